//! Worker Service
//!
//! Adding, listing and removing queue-polling workers.

use berth_core::dto::worker::{WorkerCreated, WorkerSummary};

use super::AppState;
use crate::error::Result;

pub async fn list_workers(state: &AppState) -> Vec<WorkerSummary> {
    state.workers.workers().await
}

pub async fn add_worker(state: &AppState) -> WorkerCreated {
    WorkerCreated {
        worker_id: state.workers.add().await,
    }
}

/// Removes a worker; its job is requeued at the head with `reschedule`,
/// recorded as failed otherwise
pub async fn delete_worker(state: &AppState, worker_id: u32, reschedule: bool) -> Result<()> {
    state.workers.delete_worker(worker_id, reschedule).await
}
