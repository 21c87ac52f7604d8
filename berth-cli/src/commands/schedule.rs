//! Schedule command handlers
//!
//! Handles recurring jobs: creation, listing, pause/resume, reschedule and
//! deletion.

use anyhow::{Context, Result};
use berth_core::domain::schedule::CronState;
use berth_core::dto::schedule::{CreateScheduledJob, CronStatus};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::*;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::api::ApiClient;
use crate::config::Config;

/// Schedule subcommands
#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Schedule a job from a JSON body (job_id, spec, schedule, gpu_spec)
    Create {
        /// JSON file holding the scheduled job
        #[arg(short, long)]
        file: PathBuf,
    },
    /// List scheduled jobs
    List,
    /// Show a scheduled job and its next run times
    Get {
        /// Base job ID
        job_id: String,
    },
    /// Stop firing a scheduled job
    Pause {
        /// Base job ID
        job_id: String,
    },
    /// Resume firing a paused job
    Resume {
        /// Base job ID
        job_id: String,
    },
    /// Replace the schedule of a job
    Reschedule {
        /// Base job ID
        job_id: String,

        /// Cron fields as JSON, e.g. '{"minute": "*/5"}'
        schedule: String,
    },
    /// Delete a scheduled job
    Delete {
        /// Base job ID
        job_id: String,
    },
}

/// Handle schedule commands
///
/// # Arguments
/// * `command` - The schedule command to execute
/// * `config` - The CLI configuration
pub async fn handle_schedule_command(command: ScheduleCommands, config: &Config) -> Result<()> {
    let client = ApiClient::new(&config.daemon_url);

    match command {
        ScheduleCommands::Create { file } => {
            let request = read_scheduled_job(&file)?;
            let status = client.create_scheduled_job(&request).await?;
            println!("{}", "✓ Job scheduled".green().bold());
            print_cron_status(&status);
            Ok(())
        }
        ScheduleCommands::List => list_scheduled_jobs(&client).await,
        ScheduleCommands::Get { job_id } => {
            let status = client.get_scheduled_job(&job_id).await?;
            print_cron_status(&status);
            Ok(())
        }
        ScheduleCommands::Pause { job_id } => {
            let status = client.set_schedule_status(&job_id, CronState::Paused).await?;
            println!("{} Scheduled job {} paused", "✓".green(), status.job_id);
            Ok(())
        }
        ScheduleCommands::Resume { job_id } => {
            let status = client.set_schedule_status(&job_id, CronState::Active).await?;
            println!("{} Scheduled job {} resumed", "✓".green(), status.job_id);
            print_cron_status(&status);
            Ok(())
        }
        ScheduleCommands::Reschedule { job_id, schedule } => {
            let schedule: Value =
                serde_json::from_str(&schedule).context("Schedule must be a JSON object")?;
            let status = client.reschedule_job(&job_id, schedule).await?;
            println!("{} Scheduled job {} rescheduled", "✓".green(), status.job_id);
            print_cron_status(&status);
            Ok(())
        }
        ScheduleCommands::Delete { job_id } => {
            client.delete_scheduled_job(&job_id).await?;
            println!("{} Scheduled job {} deleted", "✓".green(), job_id);
            Ok(())
        }
    }
}

fn read_scheduled_job(path: &Path) -> Result<CreateScheduledJob> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse scheduled job in {}", path.display()))
}

async fn list_scheduled_jobs(client: &ApiClient) -> Result<()> {
    let jobs = client.list_scheduled_jobs().await?;

    if jobs.is_empty() {
        println!("{}", "No scheduled jobs found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} scheduled job(s):", jobs.len()).bold()
        );
        println!();
        for job in jobs {
            print_cron_status(&job);
        }
    }

    Ok(())
}

fn print_cron_status(status: &CronStatus) {
    let state = match status.status {
        CronState::Active => status.status.to_string().green(),
        CronState::Paused => status.status.to_string().yellow(),
    };

    println!("  {} {} ({})", "▸".cyan(), status.job_id.bold(), status.worker_id.dimmed());
    println!("    Status:   {}", state);
    println!("    Image:    {}", status.properties.spec.image);

    let fields: Vec<String> = status
        .schedule
        .iter()
        .map(|(field, expr)| format!("{}={}", field, expr))
        .collect();
    println!("    Schedule: {}", fields.join(" ").dimmed());

    if !status.next_run_times.is_empty() {
        println!("    Next runs:");
        for ts in &status.next_run_times {
            println!("      {}", format_timestamp(*ts).dimmed());
        }
    } else if let Some(ts) = status.next_run_time {
        println!("    Next run: {}", format_timestamp(ts).dimmed());
    }
    println!();
}

fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
