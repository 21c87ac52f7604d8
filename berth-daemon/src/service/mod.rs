//! Service Module
//!
//! Operations exposed by the HTTP layer, composed from the scheduler, the
//! worker pool and the cron worker manager.

pub mod job;
pub mod schedule;
pub mod worker;

use std::sync::Arc;

use crate::scheduler::{CronWorkerManager, Scheduler, WorkerPool};

// Re-export for convenience
pub use job as job_service;
pub use schedule as schedule_service;
pub use worker as worker_service;

/// Handles to the running engine, shared by every request
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub workers: Arc<WorkerPool>,
    pub cron: Arc<CronWorkerManager>,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            workers: WorkerPool::new(Arc::clone(&scheduler)),
            cron: CronWorkerManager::new(Arc::clone(&scheduler)),
            scheduler,
        }
    }

    /// Ends every worker and cron worker loop
    pub async fn shutdown(&self) {
        self.workers.shutdown().await;
        self.cron.shutdown().await;
    }
}
