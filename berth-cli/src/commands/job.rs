//! Job command handlers
//!
//! Handles submitting jobs, managing the queue, stopping running jobs and
//! reading logs of jobs in any state.

use anyhow::{Context, Result, anyhow};
use berth_core::domain::job::{GpuSpec, JobRecord, JobStatus};
use berth_core::domain::spec::{CommandLine, ContainerSpec};
use berth_core::dto::job::{QueuedJob, SubmitJob};
use clap::Subcommand;
use colored::*;
use std::path::{Path, PathBuf};

use crate::api::ApiClient;
use crate::config::Config;
use crate::id_resolver::resolve_job_id;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit a job to the queue
    Submit {
        /// JSON file holding a full submission body
        #[arg(short, long, conflicts_with = "image")]
        file: Option<PathBuf>,

        /// Container image
        #[arg(long, required_unless_present = "file")]
        image: Option<String>,

        /// Shell command run in the container
        #[arg(long)]
        command: Option<String>,

        /// Environment variables (KEY=VALUE)
        #[arg(short, long = "env")]
        env: Vec<String>,

        /// Number of GPUs to reserve
        #[arg(long)]
        gpus: Option<u64>,

        /// Job ID (generated when omitted)
        #[arg(long)]
        job_id: Option<String>,
    },
    /// List queued jobs
    Queue,
    /// Move a queued job to another position
    Move {
        /// Current position
        from: usize,
        /// New position
        to: usize,
    },
    /// Remove a job from the queue
    Dequeue {
        /// Queue position
        position: usize,
    },
    /// List running jobs
    Running,
    /// Stop a running job
    Stop {
        /// Job ID or unambiguous prefix
        id: String,

        /// Put the job back at the head of the queue
        #[arg(long)]
        reschedule: bool,
    },
    /// List completed jobs
    Completed {
        /// Ordering, e.g. "end_time:desc,job_id"
        #[arg(long)]
        sort: Option<String>,
    },
    /// List failed jobs
    Failed {
        /// Ordering, e.g. "end_time:desc,job_id"
        #[arg(long)]
        sort: Option<String>,
    },
    /// Get job details
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Get job logs
    Logs {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Show the container of a running job
    Container {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Delete a completed or failed job and its archive
    Delete {
        /// Job ID or unambiguous prefix
        id: String,
    },
}

/// Handle job commands
///
/// Routes job subcommands to their respective handlers.
///
/// # Arguments
/// * `command` - The job command to execute
/// * `config` - The CLI configuration
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = ApiClient::new(&config.daemon_url);

    match command {
        JobCommands::Submit {
            file,
            image,
            command,
            env,
            gpus,
            job_id,
        } => {
            let request = match file {
                Some(path) => read_submission(&path)?,
                None => build_submission(image, command, &env, gpus, job_id)?,
            };
            submit_job(&client, &request).await
        }
        JobCommands::Queue => list_queue(&client).await,
        JobCommands::Move { from, to } => {
            client.reposition_job(from, to).await?;
            println!("{} Moved job from position {} to {}", "✓".green(), from, to);
            Ok(())
        }
        JobCommands::Dequeue { position } => {
            let entry = client.delete_queued_job(position).await?;
            println!("{} Removed job {} from the queue", "✓".green(), entry.job_id);
            Ok(())
        }
        JobCommands::Running => {
            let jobs = client.list_running_jobs().await?;
            print_records("running", &jobs);
            Ok(())
        }
        JobCommands::Stop { id, reschedule } => {
            let job_id = resolve_job_id(&client, &id).await?;
            client.stop_job(&job_id, reschedule).await?;
            if reschedule {
                println!("{} Job {} stopped and requeued", "✓".green(), job_id);
            } else {
                println!("{} Job {} stopped", "✓".green(), job_id);
            }
            Ok(())
        }
        JobCommands::Completed { sort } => {
            let jobs = client
                .list_finished_jobs(JobStatus::Completed, sort.as_deref())
                .await?;
            print_records("completed", &jobs);
            Ok(())
        }
        JobCommands::Failed { sort } => {
            let jobs = client
                .list_finished_jobs(JobStatus::Failed, sort.as_deref())
                .await?;
            print_records("failed", &jobs);
            Ok(())
        }
        JobCommands::Get { id } => get_job(&client, &id).await,
        JobCommands::Logs { id } => get_job_logs(&client, &id).await,
        JobCommands::Container { id } => {
            let job_id = resolve_job_id(&client, &id).await?;
            let info = client.get_container_id(&job_id).await?;
            println!("{}", info.container_id);
            Ok(())
        }
        JobCommands::Delete { id } => delete_job(&client, &id).await,
    }
}

fn read_submission(path: &Path) -> Result<SubmitJob> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse submission in {}", path.display()))
}

fn build_submission(
    image: Option<String>,
    command: Option<String>,
    env: &[String],
    gpus: Option<u64>,
    job_id: Option<String>,
) -> Result<SubmitJob> {
    let image = image.ok_or_else(|| anyhow!("--image is required without --file"))?;

    let mut spec = ContainerSpec::new(image);
    spec.command = command.map(CommandLine::Shell);
    for pair in env {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid environment variable '{}', expected KEY=VALUE", pair))?;
        spec.environment.insert(key.to_string(), value.to_string());
    }

    Ok(SubmitJob {
        job_id,
        spec,
        metadata: Default::default(),
        gpu_spec: gpus.map(GpuSpec::with_gpus).unwrap_or_default(),
    })
}

async fn submit_job(client: &ApiClient, request: &SubmitJob) -> Result<()> {
    let submitted = client.submit_job(request).await?;

    println!("{}", "✓ Job queued".green().bold());
    println!("  ID:       {}", submitted.job_id.bold());
    println!("  Position: {}", submitted.position);

    Ok(())
}

async fn list_queue(client: &ApiClient) -> Result<()> {
    let jobs = client.list_queued_jobs().await?;

    if jobs.is_empty() {
        println!("{}", "Queue is empty.".yellow());
    } else {
        println!("{}", format!("Found {} queued job(s):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_queued_job(&job);
        }
    }

    Ok(())
}

/// Get and display a single job
async fn get_job(client: &ApiClient, id: &str) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;
    let job = client.get_job(&job_id).await?;

    println!("{}", "Job Details".bold().underline());
    println!("  ID:      {}", job.job_id.bold());
    println!("  Status:  {}", colorize_status(job.status));
    println!("  Image:   {}", job.spec.image);
    if let Some(command) = &job.spec.command {
        println!("  Command: {}", command.to_args().join(" ").dimmed());
    }

    Ok(())
}

/// Get and display job logs, wherever the job is
async fn get_job_logs(client: &ApiClient, id: &str) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;
    let job = client.get_job(&job_id).await?;

    let logs = match job.status {
        JobStatus::Running => client.get_running_logs(&job_id).await?.logs,
        JobStatus::Completed | JobStatus::Failed => {
            client.get_finished_logs(job.status, &job_id).await?.logs
        }
        JobStatus::Queued | JobStatus::Pending => {
            println!("{}", format!("Job {} has not started yet.", job_id).yellow());
            return Ok(());
        }
    };

    if logs.is_empty() {
        println!("{}", "No logs found for this job.".yellow());
    } else {
        println!("{}", format!("Logs for job {}:", job_id).bold());
        println!("{}", "─".repeat(80).dimmed());
        print!("{}", logs);
        if !logs.ends_with('\n') {
            println!();
        }
        println!("{}", "─".repeat(80).dimmed());
    }

    Ok(())
}

async fn delete_job(client: &ApiClient, id: &str) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;
    let job = client.get_job(&job_id).await?;

    match job.status {
        JobStatus::Completed | JobStatus::Failed => {
            client.delete_finished_job(job.status, &job_id).await?;
            println!("{} Job {} deleted", "✓".green(), job_id);
            Ok(())
        }
        status => Err(anyhow!(
            "Job {} is {}; only completed or failed jobs can be deleted",
            job_id,
            status
        )),
    }
}

fn print_queued_job(job: &QueuedJob) {
    println!(
        "  {} [{}] {}",
        "▸".cyan(),
        job.position,
        job.entry.job_id.bold()
    );
    println!("    Image:  {}", job.entry.spec.image);
    println!(
        "    Queued: {}",
        job.entry
            .queued_time
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_records(label: &str, records: &[JobRecord]) {
    if records.is_empty() {
        println!("{}", format!("No {} jobs found.", label).yellow());
        return;
    }

    println!(
        "{}",
        format!("Found {} {} job(s):", records.len(), label).bold()
    );
    println!();
    for record in records {
        print_record(record);
    }
}

fn print_record(record: &JobRecord) {
    println!("  {} Job {}", "▸".cyan(), record.job_id.bold());
    println!("    Image:    {}", record.spec.image);
    if let Some(started) = record.start_time {
        println!(
            "    Started:  {}",
            started.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
    if let Some(ended) = record.end_time {
        println!(
            "    Finished: {}",
            ended.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
    if let Some(elapsed) = record.elapsed() {
        println!("    Duration: {}s", elapsed.num_seconds());
    }
    if let Some(code) = record.return_code {
        let code_str = code.to_string();
        let colored_code = if code == 0 {
            code_str.green()
        } else {
            code_str.red()
        };
        println!("    Exit:     {}", colored_code);
    }
    if !record.gpu_ids.is_empty() {
        println!("    GPUs:     {}", record.gpu_ids.join(","));
    }
    if let Some(worker_id) = &record.worker_id {
        println!("    Worker:   {}", worker_id);
    }
    println!();
}

/// Colorize job status for display
fn colorize_status(status: JobStatus) -> colored::ColoredString {
    let status_str = status.to_string();
    match status {
        JobStatus::Queued => status_str.blue(),
        JobStatus::Pending => status_str.yellow(),
        JobStatus::Running => status_str.yellow(),
        JobStatus::Completed => status_str.green(),
        JobStatus::Failed => status_str.red(),
    }
}
