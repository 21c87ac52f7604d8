//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod schedule;
mod worker;

pub use job::JobCommands;
pub use schedule::ScheduleCommands;
pub use worker::WorkerCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;

use crate::api::ApiClient;
use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Job management
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Worker management
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// Scheduled (recurring) job management
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
    /// Show daemon health
    Health,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Worker { command } => worker::handle_worker_command(command, config).await,
        Commands::Schedule { command } => {
            schedule::handle_schedule_command(command, config).await
        }
        Commands::Health => show_health(config).await,
    }
}

async fn show_health(config: &Config) -> Result<()> {
    let client = ApiClient::new(&config.daemon_url);
    let health = client.health().await?;

    println!("{} {}", "Daemon:".bold(), config.daemon_url);
    println!("{}", serde_json::to_string_pretty(&health)?);

    Ok(())
}
