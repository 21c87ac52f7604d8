//! Queue dispatch
//!
//! One dispatch attempt, run entirely under the dispatch lock:
//! 1. Peek the queue head
//! 2. Read its GPU requirement; a malformed one, or one larger than the whole
//!    pool, fails the job permanently
//! 3. Lock the GPUs, or leave the entry in place if too few are free
//! 4. Write the job to the running store, then pop the entry, so the job is
//!    never missing from both
//!
//! Queue listings and job lookups read under the same lock, so they never
//! see a job both queued and running.

use berth_core::domain::job::{JobLogs, JobRecord, QueueEntry};
use chrono::Utc;
use tracing::{debug, warn};

use super::Scheduler;
use crate::error::Result;
use crate::gpu::GpuLease;
use crate::repository::StoreError;

/// Why nothing was dispatched this time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    EmptyQueue,
    InsufficientGpus { requested: usize, available: usize },
}

/// Result of one dispatch attempt
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The head was popped and its GPUs locked
    Dispatched { entry: QueueEntry, lease: GpuLease },
    /// Nothing changed; retry on the next tick
    Deferred(DeferReason),
    /// The head can never run and was moved to the failed store
    PermanentFailure { job_id: String, reason: String },
}

impl Scheduler {
    /// Attempts to take the queue head for execution
    pub async fn try_dispatch(&self) -> Result<DispatchOutcome> {
        let _guard = self.lock_dispatch().await;

        let entry = match self.stores().queue.peek_front().await {
            Ok(entry) => entry,
            Err(StoreError::Empty) => return Ok(DispatchOutcome::Deferred(DeferReason::EmptyQueue)),
            Err(e) => return Err(e.into()),
        };

        let requested = match entry.gpu_spec.requested() {
            Ok(requested) => requested,
            Err(e) => return self.fail_head(entry, e.to_string()).await,
        };

        let total = self.gpus().total();
        if requested > total {
            let reason = format!(
                "Job requires {} GPU(s) but only {} GPU(s) are available on this host",
                requested, total
            );
            return self.fail_head(entry, reason).await;
        }

        let Some(lease) = self.gpus().try_lock(requested) else {
            let available = self.gpus().available();
            debug!(
                job_id = %entry.job_id,
                requested, available, "Not enough free GPUs, leaving job queued"
            );
            return Ok(DispatchOutcome::Deferred(DeferReason::InsufficientGpus {
                requested,
                available,
            }));
        };

        // The lease is released on drop if either write fails
        let mut record = JobRecord::from(entry.clone());
        record.gpu_ids = lease.ids().to_vec();
        self.stores().running.set(record).await?;

        let entry = match self.stores().queue.pop_front().await {
            Ok(entry) => entry,
            Err(e) => {
                self.stores().running.delete(&entry.job_id).await?;
                return Err(e.into());
            }
        };
        debug!(job_id = %entry.job_id, gpus = ?lease.ids(), "Job dispatched");

        Ok(DispatchOutcome::Dispatched { entry, lease })
    }

    /// Moves the queue head straight to the failed store
    async fn fail_head(&self, entry: QueueEntry, reason: String) -> Result<DispatchOutcome> {
        warn!(job_id = %entry.job_id, "Job cannot run: {}", reason);

        let job_id = entry.job_id.clone();
        let mut record = JobRecord::from(entry);
        record.end_time = Some(Utc::now());
        record.logs = Some(JobLogs::Text(reason.clone()));

        self.stores().failed.set(record.clone()).await?;
        self.stores().queue.pop_front().await?;
        self.observers().failed(&record);

        Ok(DispatchOutcome::PermanentFailure { job_id, reason })
    }
}
