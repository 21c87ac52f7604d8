//! Container CLI backend
//!
//! Drives docker (or any CLI-compatible runtime such as podman) through
//! subprocesses:
//! - `run -d` starts the container and yields its id
//! - `wait` blocks until it exits and prints the exit code
//! - `logs`, `stop -t` and `rm -f` complete the lifecycle

use anyhow::{Context, Result};
use async_trait::async_trait;
use berth_core::domain::spec::{CommandLine, ContainerSpec};
use serde_json::Value;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{BackendError, ExecutionBackend, ExecutionHandle};

/// Label carrying the job id on every container
const JOB_LABEL: &str = "berth.job_id";

/// Checks that the container runtime is installed and answering
pub async fn check_runtime_available(runtime: &str) -> Result<()> {
    let output = Command::new(runtime)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("Failed to execute '{} --version'. Is it installed?", runtime))?;

    if !output.status.success() {
        anyhow::bail!("{} is not working correctly", runtime);
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("{} is available: {}", runtime, version.trim());

    Ok(())
}

/// Backend running each job as a detached container
#[derive(Debug, Clone)]
pub struct ContainerCliBackend {
    runtime: String,
}

impl ContainerCliBackend {
    /// # Arguments
    /// * `runtime` - Container CLI to invoke (e.g. "docker", "podman")
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }
}

#[async_trait]
impl ExecutionBackend for ContainerCliBackend {
    async fn run(
        &self,
        job_id: &str,
        spec: &ContainerSpec,
    ) -> Result<Arc<dyn ExecutionHandle>, BackendError> {
        let args = build_run_args(job_id, spec);
        debug!("{} {}", self.runtime, args.join(" "));

        let output = run_command(&self.runtime, &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BackendError::Start(format!(
                "exit_code={:?}, stderr='{}'",
                output.status.code(),
                stderr
            )));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(BackendError::Start(
                "runtime did not report a container id".to_string(),
            ));
        }

        info!(job_id, container_id = %container_id, "Container started");

        Ok(Arc::new(ContainerHandle {
            runtime: self.runtime.clone(),
            id: container_id,
        }))
    }
}

/// A started container
#[derive(Debug)]
struct ContainerHandle {
    runtime: String,
    id: String,
}

impl ContainerHandle {
    /// Runs a runtime subcommand against this container, failing on a
    /// non-zero exit
    async fn exec(&self, args: &[String]) -> Result<Output, BackendError> {
        let output = run_command(&self.runtime, args).await?;

        if !output.status.success() {
            return Err(BackendError::Command {
                command: format!("{} {}", self.runtime, args.join(" ")),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl ExecutionHandle for ContainerHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait(&self) -> Result<i64, BackendError> {
        let output = self
            .exec(&["wait".to_string(), self.id.clone()])
            .await
            .map_err(|e| BackendError::ConnectionLost(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout.trim().parse::<i64>().map_err(|_| {
            BackendError::ConnectionLost(format!("unexpected wait output '{}'", stdout.trim()))
        })
    }

    async fn logs(&self) -> Result<Vec<u8>, BackendError> {
        let output = self.exec(&["logs".to_string(), self.id.clone()]).await?;

        // The runtime replays the container's stderr on its own stderr
        let mut logs = output.stdout;
        logs.extend_from_slice(&output.stderr);
        Ok(logs)
    }

    async fn stop(&self, timeout: Duration) -> Result<(), BackendError> {
        self.exec(&[
            "stop".to_string(),
            "-t".to_string(),
            timeout.as_secs().to_string(),
            self.id.clone(),
        ])
        .await?;
        Ok(())
    }

    async fn remove(&self) -> Result<(), BackendError> {
        self.exec(&["rm".to_string(), "-f".to_string(), self.id.clone()])
            .await?;
        Ok(())
    }
}

async fn run_command(runtime: &str, args: &[String]) -> Result<Output, BackendError> {
    Ok(Command::new(runtime)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?)
}

/// Builds the `run` arguments for a normalized spec
fn build_run_args(job_id: &str, spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["run".to_string(), "-d".to_string()];

    // A requeued job may start before its previous container is gone
    if let Some(name) = &spec.name {
        args.push("--name".to_string());
        args.push(name.clone());
    }
    args.push(format!("--label={}={}", JOB_LABEL, job_id));

    if let Some(log_config) = &spec.log_config {
        args.push(format!("--log-driver={}", log_config.driver));
        for (key, value) in &log_config.config {
            args.push(format!("--log-opt={}={}", key, value));
        }
    }

    for (key, value) in &spec.environment {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    for (host, binding) in &spec.volumes {
        args.push("-v".to_string());
        args.push(format!("{}:{}:{}", host, binding.bind, binding.mode));
    }

    if let Some(working_dir) = &spec.working_dir {
        args.push("-w".to_string());
        args.push(working_dir.clone());
    }

    if let Some(runtime) = &spec.runtime {
        args.push(format!("--runtime={}", runtime));
    }

    for (key, value) in &spec.extra {
        push_extra_option(&mut args, key, value);
    }

    // The CLI takes a single entrypoint binary; remaining words lead the command
    let mut command = Vec::new();
    if let Some(entrypoint) = &spec.entrypoint {
        let mut words = entrypoint.to_args().into_iter();
        if let Some(binary) = words.next() {
            args.push(format!("--entrypoint={}", binary));
            command.extend(words);
        }
    }
    command.extend(spec.command.as_ref().map(CommandLine::to_args).unwrap_or_default());

    args.push(spec.image.clone());
    args.extend(command);
    args
}

/// Passes an uninterpreted option through as `--key=value`
fn push_extra_option(args: &mut Vec<String>, key: &str, value: &Value) {
    let flag = key.replace('_', "-");

    match value {
        Value::Null | Value::Bool(false) => {}
        Value::Bool(true) => args.push(format!("--{}", flag)),
        Value::String(text) => args.push(format!("--{}={}", flag, text)),
        Value::Number(number) => args.push(format!("--{}={}", flag, number)),
        Value::Array(items) => {
            for item in items {
                push_extra_option(args, key, item);
            }
        }
        Value::Object(_) => warn!("Ignoring structured container option '{}'", key),
    }
}
