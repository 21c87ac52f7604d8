//! Execution driver
//!
//! Runs one dispatched job from start to finish. The same driver serves
//! queue workers and cron workers:
//!
//! 1. [`start`] writes the job to the running store
//! 2. [`run_to_completion`] normalizes the spec, starts the backend run,
//!    waits for it, captures logs and exit code, routes the record to the
//!    completed or failed store, and cleans up
//!
//! Whatever happens, the running entry is removed and the GPUs released
//! exactly once. If the run is stopped on request while in flight, the stop
//! path does the routing and release; the driver only removes the handle.

use berth_core::domain::job::{JobLogs, JobRecord, JobStatus, QueueEntry};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use super::Scheduler;
use crate::backend::ExecutionHandle;
use crate::error::Result;
use crate::gpu::GpuLease;

#[derive(Default)]
struct RunSlot {
    handle: Option<Arc<dyn ExecutionHandle>>,
    stopped: bool,
    settled: bool,
}

/// A job between dispatch and settlement
pub struct ActiveRun {
    /// Queue entry as it was dispatched, used to reschedule
    entry: QueueEntry,
    record: Mutex<JobRecord>,
    lease: GpuLease,
    slot: Mutex<RunSlot>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ActiveRun {
    pub fn job_id(&self) -> &str {
        &self.entry.job_id
    }

    pub fn entry(&self) -> &QueueEntry {
        &self.entry
    }

    pub fn record(&self) -> JobRecord {
        lock(&self.record).clone()
    }

    /// Backend handle, once the run has started
    pub fn handle(&self) -> Option<Arc<dyn ExecutionHandle>> {
        lock(&self.slot).handle.clone()
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.slot).stopped
    }

    fn update_record(&self, update: impl FnOnce(&mut JobRecord)) -> JobRecord {
        let mut record = lock(&self.record);
        update(&mut record);
        record.clone()
    }

    /// Stores the started handle
    ///
    /// Returns false if the run was stopped meanwhile; the caller then owns
    /// stopping and removing the handle.
    fn attach_handle(&self, handle: Arc<dyn ExecutionHandle>) -> bool {
        let mut slot = lock(&self.slot);
        if slot.stopped {
            return false;
        }
        slot.handle = Some(handle);
        true
    }

    /// Takes over routing and release for the stop path
    ///
    /// Returns `None` if the run already settled or is already being
    /// stopped, otherwise the handle to stop (if the run had started).
    pub(crate) fn claim_stop(&self) -> Option<Option<Arc<dyn ExecutionHandle>>> {
        let mut slot = lock(&self.slot);
        if slot.settled || slot.stopped {
            return None;
        }
        slot.stopped = true;
        slot.settled = true;
        Some(slot.handle.clone())
    }

    /// Takes over routing and release for the driver
    fn claim_settle(&self) -> bool {
        let mut slot = lock(&self.slot);
        if slot.settled {
            return false;
        }
        slot.settled = true;
        true
    }
}

/// Marks a dispatched job as running
///
/// # Arguments
/// * `entry` - Dispatched queue entry
/// * `lease` - GPUs locked for the run
/// * `worker_id` - Worker (or cron worker) running the job
pub async fn start(
    scheduler: &Scheduler,
    entry: QueueEntry,
    lease: GpuLease,
    worker_id: &str,
) -> Result<Arc<ActiveRun>> {
    let mut record = JobRecord::from(entry.clone());
    record.start_time = Some(Utc::now());
    record.gpu_ids = lease.ids().to_vec();
    record.worker_id = Some(worker_id.to_string());

    if let Err(e) = scheduler.stores().running.set(record.clone()).await {
        error!(job_id = %record.job_id, "Failed to mark job running: {}", e);
        record.end_time = Some(Utc::now());
        record.logs = Some(JobLogs::Text(format!("Failed to mark job running: {}", e)));
        if let Err(e) = scheduler.stores().failed.set(record.clone()).await {
            error!(job_id = %record.job_id, "Failed to record failed job: {}", e);
        } else {
            scheduler.observers().failed(&record);
        }
        return Err(e.into());
    }

    Ok(Arc::new(ActiveRun {
        entry,
        record: Mutex::new(record),
        lease,
        slot: Mutex::new(RunSlot::default()),
    }))
}

/// Runs a started job to the end
///
/// Returns the state the job was routed to, or `None` if it was stopped on
/// request.
pub async fn run_to_completion(scheduler: &Scheduler, run: &Arc<ActiveRun>) -> Option<JobStatus> {
    let config = scheduler.config();
    let job_id = run.job_id().to_string();

    if run.is_stopped() {
        return None;
    }

    let spec = run
        .entry
        .spec
        .normalized(run.lease.ids(), &config.log_max_size);

    let handle = match scheduler.backend().run(&job_id, &spec).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(job_id = %job_id, "Failed to start job: {}", e);
            run.update_record(|record| {
                record.end_time = Some(Utc::now());
                record.logs = Some(JobLogs::Text(e.to_string()));
            });
            return settle(scheduler, run, JobStatus::Failed).await;
        }
    };

    if !run.attach_handle(Arc::clone(&handle)) {
        debug!(job_id = %job_id, "Job stopped while starting");
        if let Err(e) = handle.stop(config.stop_timeout).await {
            warn!(job_id = %job_id, "Failed to stop job: {}", e);
        }
        remove_handle(&job_id, handle.as_ref()).await;
        return None;
    }

    info!(job_id = %job_id, container_id = handle.id(), "Job running");
    scheduler.observers().running(&run.record());

    let outcome = handle.wait().await;

    // Whoever stopped the run removes the handle
    if run.is_stopped() {
        return None;
    }

    let status = match outcome {
        Ok(exit_code) => {
            let logs = match handle.logs().await {
                Ok(bytes) => JobLogs::from_bytes(bytes),
                Err(e) => JobLogs::Text(format!("Failed to read logs: {}", e)),
            };
            run.update_record(|record| {
                record.end_time = Some(Utc::now());
                record.return_code = Some(exit_code);
                record.logs = Some(logs);
            });

            remove_handle(&job_id, handle.as_ref()).await;
            if !config.retain_working_dirs {
                if let Err(e) = scheduler.workspace().remove_job_dir(&job_id) {
                    warn!(job_id = %job_id, "Failed to remove working directory: {}", e);
                }
            }

            if exit_code == 0 {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            }
        }
        Err(e) => {
            error!(job_id = %job_id, "Lost track of job: {}", e);
            if let Err(e) = handle.stop(config.stop_timeout).await {
                warn!(job_id = %job_id, "Failed to stop job: {}", e);
            }
            run.update_record(|record| {
                record.end_time = Some(Utc::now());
                record.logs = Some(JobLogs::Text(e.to_string()));
            });
            JobStatus::Failed
        }
    };

    settle(scheduler, run, status).await
}

/// Routes the record, clears the running entry and releases the GPUs
async fn settle(scheduler: &Scheduler, run: &ActiveRun, status: JobStatus) -> Option<JobStatus> {
    if !run.claim_settle() {
        return None;
    }

    let record = run.record();
    let stores = scheduler.stores();
    let destination = match status {
        JobStatus::Completed => &stores.completed,
        _ => &stores.failed,
    };

    if let Err(e) = destination.set(record.clone()).await {
        error!(job_id = %record.job_id, "Failed to record {} job: {}", status, e);
    }
    if let Err(e) = stores.running.delete(&record.job_id).await {
        error!(job_id = %record.job_id, "Failed to clear running job: {}", e);
    }
    run.lease.release();

    match status {
        JobStatus::Completed => scheduler.observers().completed(&record),
        _ => scheduler.observers().failed(&record),
    }

    info!(job_id = %record.job_id, return_code = record.return_code, "Job {}", status);
    Some(status)
}

async fn remove_handle(job_id: &str, handle: &dyn ExecutionHandle) {
    if let Err(e) = handle.remove().await {
        warn!(job_id, container_id = handle.id(), "Failed to remove container: {}", e);
    }
}

/// Stops a run on request
///
/// With `reschedule` the original queue entry goes back to the head of the
/// queue; otherwise the job is recorded as failed. Either way the running
/// entry is removed and the GPUs released, even if stopping the backend
/// run fails.
///
/// Returns false if the run had already finished or was already stopping.
pub async fn stop(scheduler: &Scheduler, run: &ActiveRun, reschedule: bool) -> Result<bool> {
    let Some(handle) = run.claim_stop() else {
        return Ok(false);
    };
    let job_id = run.job_id().to_string();
    info!(job_id = %job_id, reschedule, "Stopping job");

    let mut logs = None;
    if let Some(handle) = &handle {
        if let Err(e) = handle.stop(scheduler.config().stop_timeout).await {
            warn!(job_id = %job_id, "Failed to stop job: {}", e);
        }
        logs = handle.logs().await.ok().map(JobLogs::from_bytes);
        remove_handle(&job_id, handle.as_ref()).await;
    }

    let record = run.update_record(|record| {
        record.end_time = Some(Utc::now());
        record.logs = Some(logs.unwrap_or_else(|| JobLogs::Text("Job stopped".to_string())));
    });

    let stores = scheduler.stores();
    let result: Result<()> = if reschedule {
        // Requeue and clear under the dispatch lock so no worker can pick the
        // job up while it is still in the running store
        let _guard = scheduler.lock_dispatch().await;
        let requeued = scheduler.requeue_front(run.entry.clone()).await;
        let cleared = stores.running.delete(&job_id).await;
        requeued.and(cleared.map(|_| ()).map_err(Into::into))
    } else {
        let recorded = stores.failed.set(record.clone()).await;
        let cleared = stores.running.delete(&job_id).await;
        if recorded.is_ok() {
            scheduler.observers().failed(&record);
        }
        recorded.and(cleared.map(|_| ())).map_err(Into::into)
    };

    run.lease.release();
    result.map(|()| true)
}
