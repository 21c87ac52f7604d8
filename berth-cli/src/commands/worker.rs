//! Worker command handlers
//!
//! Handles listing, adding and removing queue-polling workers.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use berth_core::dto::worker::{WorkerState, WorkerSummary};

use crate::api::ApiClient;
use crate::config::Config;

/// Worker subcommands
#[derive(Subcommand)]
pub enum WorkerCommands {
    /// List all workers
    List,
    /// Start a new worker
    Add,
    /// Remove a worker, stopping its job
    Delete {
        /// Worker ID
        id: u32,

        /// Put the worker's job back at the head of the queue
        #[arg(long)]
        reschedule: bool,
    },
}

/// Handle worker commands
///
/// # Arguments
/// * `command` - The worker command to execute
/// * `config` - The CLI configuration
pub async fn handle_worker_command(command: WorkerCommands, config: &Config) -> Result<()> {
    let client = ApiClient::new(&config.daemon_url);

    match command {
        WorkerCommands::List => list_workers(&client).await,
        WorkerCommands::Add => {
            let created = client.add_worker().await?;
            println!("{} Worker {} started", "✓".green(), created.worker_id);
            Ok(())
        }
        WorkerCommands::Delete { id, reschedule } => {
            client.delete_worker(id, reschedule).await?;
            println!("{} Worker {} deleted", "✓".green(), id);
            Ok(())
        }
    }
}

async fn list_workers(client: &ApiClient) -> Result<()> {
    let workers = client.list_workers().await?;

    if workers.is_empty() {
        println!("{}", "No workers running.".yellow());
    } else {
        println!("{}", format!("Found {} worker(s):", workers.len()).bold());
        println!();
        for worker in workers {
            print_worker_summary(&worker);
        }
    }

    Ok(())
}

fn print_worker_summary(worker: &WorkerSummary) {
    println!("  {} Worker {}", "▸".cyan(), worker.worker_id.to_string().bold());
    println!("    Status: {}", colorize_state(worker.status));
    if let Some(job_id) = &worker.job_id {
        println!("    Job:    {}", job_id.dimmed());
    }
    println!();
}

fn colorize_state(state: WorkerState) -> colored::ColoredString {
    let state_str = state.to_string();
    match state {
        WorkerState::Idle => state_str.dimmed(),
        WorkerState::Pending => state_str.yellow(),
        WorkerState::Running => state_str.green(),
    }
}
