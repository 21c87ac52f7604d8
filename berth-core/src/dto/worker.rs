//! Worker DTOs

use serde::{Deserialize, Serialize};

/// What a worker is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    /// Holds a job but has not started its container yet
    Pending,
    Running,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::Pending => write!(f, "pending"),
            WorkerState::Running => write!(f, "running"),
        }
    }
}

/// One entry of the worker listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker_id: u32,
    pub status: WorkerState,
    pub job_id: Option<String>,
}

/// Response to worker creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCreated {
    pub worker_id: u32,
}

/// Query string of the delete-worker endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteWorkerQuery {
    #[serde(default)]
    pub reschedule: bool,
}
