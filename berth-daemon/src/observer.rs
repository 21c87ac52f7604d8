//! Job lifecycle observers
//!
//! Observers are told when a job is queued, starts running, completes,
//! fails or is deleted. Notifications are fire-and-forget: a failing
//! observer is logged and never affects the job.

use anyhow::Result;
use berth_core::domain::job::{JobRecord, QueueEntry};
use std::sync::Arc;
use tracing::{info, warn};

/// Receives job lifecycle notifications
pub trait JobObserver: Send + Sync {
    /// Name used when reporting a failing hook
    fn name(&self) -> &str;

    fn queued(&self, _entry: &QueueEntry) -> Result<()> {
        Ok(())
    }

    fn running(&self, _record: &JobRecord) -> Result<()> {
        Ok(())
    }

    fn completed(&self, _record: &JobRecord) -> Result<()> {
        Ok(())
    }

    fn failed(&self, _record: &JobRecord) -> Result<()> {
        Ok(())
    }

    fn deleted(&self, _job_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Every registered observer
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn JobObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn notify(&self, event: &str, job_id: &str, hook: impl Fn(&dyn JobObserver) -> Result<()>) {
        for observer in &self.observers {
            if let Err(e) = hook(observer.as_ref()) {
                warn!(
                    job_id,
                    observer = observer.name(),
                    "Observer failed to handle {} event: {:#}",
                    event,
                    e
                );
            }
        }
    }

    pub fn queued(&self, entry: &QueueEntry) {
        self.notify("queued", &entry.job_id, |o| o.queued(entry));
    }

    pub fn running(&self, record: &JobRecord) {
        self.notify("running", &record.job_id, |o| o.running(record));
    }

    pub fn completed(&self, record: &JobRecord) {
        self.notify("completed", &record.job_id, |o| o.completed(record));
    }

    pub fn failed(&self, record: &JobRecord) {
        self.notify("failed", &record.job_id, |o| o.failed(record));
    }

    pub fn deleted(&self, job_id: &str) {
        self.notify("deleted", job_id, |o| o.deleted(job_id));
    }
}

/// Logs every lifecycle event
pub struct TracingObserver;

impl JobObserver for TracingObserver {
    fn name(&self) -> &str {
        "tracing"
    }

    fn queued(&self, entry: &QueueEntry) -> Result<()> {
        info!(job_id = %entry.job_id, "Job queued");
        Ok(())
    }

    fn running(&self, record: &JobRecord) -> Result<()> {
        info!(
            job_id = %record.job_id,
            worker_id = record.worker_id.as_deref().unwrap_or("-"),
            gpus = ?record.gpu_ids,
            "Job running"
        );
        Ok(())
    }

    fn completed(&self, record: &JobRecord) -> Result<()> {
        info!(
            job_id = %record.job_id,
            elapsed_secs = record.elapsed().map(|d| d.num_seconds()),
            "Job completed"
        );
        Ok(())
    }

    fn failed(&self, record: &JobRecord) -> Result<()> {
        warn!(
            job_id = %record.job_id,
            return_code = record.return_code,
            "Job failed"
        );
        Ok(())
    }

    fn deleted(&self, job_id: &str) -> Result<()> {
        info!(job_id, "Job deleted");
        Ok(())
    }
}
