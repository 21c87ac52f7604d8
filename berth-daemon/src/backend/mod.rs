//! Execution backend
//!
//! The daemon never runs containers itself. It hands a normalized
//! [`ContainerSpec`] to an [`ExecutionBackend`] and drives the returned
//! [`ExecutionHandle`] through wait, logs, stop and remove.

mod container;

use async_trait::async_trait;
use berth_core::domain::spec::ContainerSpec;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use container::{ContainerCliBackend, check_runtime_available};

/// Errors raised by execution backends
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to start container: {0}")]
    Start(String),

    #[error("lost connection to container: {0}")]
    ConnectionLost(String),

    #[error("'{command}' failed (exit code {code:?}): {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to invoke container runtime: {0}")]
    Io(#[from] std::io::Error),
}

/// Starts runs
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Starts a detached run of `spec` for `job_id`
    ///
    /// # Arguments
    /// * `job_id` - Job the run belongs to, used to name the run
    /// * `spec` - Normalized container spec
    async fn run(
        &self,
        job_id: &str,
        spec: &ContainerSpec,
    ) -> Result<Arc<dyn ExecutionHandle>, BackendError>;
}

/// Handle to one started run
#[async_trait]
pub trait ExecutionHandle: Send + Sync {
    /// Backend identifier of the run (e.g. the container id)
    fn id(&self) -> &str;

    /// Blocks until the run exits and returns its exit code
    ///
    /// # Errors
    /// [`BackendError::ConnectionLost`] if the run can no longer be observed
    async fn wait(&self) -> Result<i64, BackendError>;

    /// Output captured so far
    async fn logs(&self) -> Result<Vec<u8>, BackendError>;

    /// Asks the run to stop, killing it after `timeout`
    async fn stop(&self, timeout: Duration) -> Result<(), BackendError>;

    /// Removes the run and its resources
    async fn remove(&self) -> Result<(), BackendError>;
}
