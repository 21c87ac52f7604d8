//! Scheduling engine
//!
//! [`Scheduler`] owns the stores, the GPU pool and the dispatch lock shared by
//! every worker. Queue-polling workers live in [`WorkerPool`], schedule-driven
//! ones in [`CronWorkerManager`]; both hand dispatched jobs to the execution
//! driver.

pub mod cron;
pub mod dispatch;
pub mod driver;
pub mod pool;
pub mod worker;

pub use cron::CronWorkerManager;
pub use dispatch::{DeferReason, DispatchOutcome};
pub use pool::WorkerPool;
pub use worker::Worker;

use berth_core::domain::job::{GpuSpec, JobLogs, JobRecord, Metadata, QueueEntry};
use berth_core::domain::spec::ContainerSpec;
use berth_core::dto::job::{JobSubmitted, QueuedJob};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::ExecutionBackend;
use crate::config::Config;
use crate::error::{Result, SchedulerError};
use crate::gpu::GpuPool;
use crate::observer::ObserverSet;
use crate::repository::Stores;
use crate::workspace::{Workspace, is_valid_job_id};

/// Shared state of the scheduling engine
pub struct Scheduler {
    config: Config,
    stores: Stores,
    gpus: Arc<GpuPool>,
    /// Serializes every operation that reads or changes the queue head
    dispatch_lock: Mutex<()>,
    backend: Arc<dyn ExecutionBackend>,
    observers: ObserverSet,
    workspace: Workspace,
}

impl Scheduler {
    pub fn new(
        config: Config,
        stores: Stores,
        backend: Arc<dyn ExecutionBackend>,
        observers: ObserverSet,
    ) -> Arc<Self> {
        let gpus = GpuPool::new(config.gpu_ids.clone());
        let workspace = Workspace::new(&config.working_dir, &config.archive_dir);

        Arc::new(Self {
            config,
            stores,
            gpus,
            dispatch_lock: Mutex::new(()),
            backend,
            observers,
            workspace,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn gpus(&self) -> &Arc<GpuPool> {
        &self.gpus
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn observers(&self) -> &ObserverSet {
        &self.observers
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    pub(crate) async fn lock_dispatch(&self) -> MutexGuard<'_, ()> {
        self.dispatch_lock.lock().await
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Appends a job to the queue
    ///
    /// A missing job id is replaced by a fresh UUID.
    ///
    /// # Errors
    /// [`SchedulerError::DuplicateJob`] if the id is queued, running or
    /// finished already
    pub async fn submit(
        &self,
        job_id: Option<String>,
        spec: ContainerSpec,
        metadata: Metadata,
        gpu_spec: GpuSpec,
    ) -> Result<JobSubmitted> {
        let job_id = match job_id {
            Some(id) if !is_valid_job_id(&id) => {
                return Err(SchedulerError::InvalidRequest(format!(
                    "'{}' is not a valid job id",
                    id
                )));
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        let _guard = self.lock_dispatch().await;

        if self.job_exists(&job_id).await? {
            return Err(SchedulerError::DuplicateJob(job_id));
        }

        let entry = QueueEntry::new(job_id.clone(), spec, metadata, gpu_spec);
        let position = self.stores.queue.append(entry.clone()).await?;

        info!(job_id = %job_id, position, "Job submitted");
        self.observers.queued(&entry);

        Ok(JobSubmitted { job_id, position })
    }

    /// Returns true if the id is queued, running, completed or failed
    pub async fn job_exists(&self, job_id: &str) -> Result<bool> {
        if self.stores.running.contains(job_id).await?
            || self.stores.completed.contains(job_id).await?
            || self.stores.failed.contains(job_id).await?
        {
            return Ok(true);
        }

        Ok(self
            .stores
            .queue
            .entries()
            .await?
            .iter()
            .any(|entry| entry.job_id == job_id))
    }

    pub async fn queued_jobs(&self) -> Result<Vec<QueuedJob>> {
        let _guard = self.lock_dispatch().await;
        Ok(self
            .stores
            .queue
            .entries()
            .await?
            .into_iter()
            .enumerate()
            .map(|(position, entry)| QueuedJob { position, entry })
            .collect())
    }

    pub async fn queued_job(&self, position: usize) -> Result<QueueEntry> {
        let _guard = self.lock_dispatch().await;
        Ok(self.stores.queue.get(position).await?)
    }

    /// Moves a queued job; an out-of-range target leaves the queue unchanged
    pub async fn reposition(&self, from: usize, to: usize) -> Result<()> {
        let _guard = self.lock_dispatch().await;
        self.stores.queue.reposition(from, to).await?;
        info!(from, to, "Queued job repositioned");
        Ok(())
    }

    /// Removes a queued job
    pub async fn delete_queued(&self, position: usize) -> Result<QueueEntry> {
        let entry = {
            let _guard = self.lock_dispatch().await;
            self.stores.queue.delete_at(position).await?
        };

        info!(job_id = %entry.job_id, position, "Queued job deleted");
        self.observers.deleted(&entry.job_id);
        Ok(entry)
    }

    /// Puts a stopped job back at the head of the queue
    pub(crate) async fn requeue_front(&self, entry: QueueEntry) -> Result<()> {
        self.stores.queue.insert_front(entry).await?;
        Ok(())
    }

    /// Settles jobs a previous daemon left in the running store
    ///
    /// Must run before any worker starts. Queue jobs go back to the head of
    /// the queue in their original order; runs of a scheduled job are
    /// recorded as failed, the next firing runs it again. Returns the number
    /// of jobs requeued and failed.
    pub async fn recover_orphans(&self) -> Result<(usize, usize)> {
        let _guard = self.lock_dispatch().await;

        let orphans = self.stores.running.items().await?;
        let (mut requeued, mut failed) = (0, 0);

        // insert_front reverses, so the newest goes in first
        for record in orphans.into_iter().rev() {
            let job_id = record.job_id.clone();
            let from_cron = record
                .worker_id
                .as_deref()
                .is_some_and(cron::is_cron_worker_id);

            if from_cron {
                let mut record = record;
                record.end_time = Some(Utc::now());
                record.logs = Some(JobLogs::Text(
                    "Daemon stopped while the job was running".to_string(),
                ));
                self.stores.failed.set(record.clone()).await?;
                self.stores.running.delete(&job_id).await?;
                self.observers.failed(&record);
                failed += 1;
                warn!(job_id = %job_id, "Scheduled run interrupted by a restart, recorded as failed");
            } else {
                self.stores.queue.insert_front(record.queue_entry()).await?;
                self.stores.running.delete(&job_id).await?;
                requeued += 1;
                warn!(job_id = %job_id, "Job interrupted by a restart, requeued at the head");
            }
        }

        Ok((requeued, failed))
    }

    // =========================================================================
    // Finished jobs
    // =========================================================================

    /// Deletes a completed or failed job along with its archive
    pub async fn delete_finished(&self, job_id: &str) -> Result<JobRecord> {
        let record = match self.stores.failed.delete(job_id).await? {
            Some(record) => record,
            None => self
                .stores
                .completed
                .delete(job_id)
                .await?
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?,
        };

        if let Err(e) = self.workspace.remove_archive(job_id) {
            warn!(job_id, "Failed to remove archive: {}", e);
        }

        info!(job_id, "Finished job deleted");
        self.observers.deleted(job_id);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::tests::record;
    use crate::testing::{TestContext, submit};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_submit_rejects_ids_outside_the_working_dir() {
        let ctx = TestContext::new(&[]);
        let victim = TempDir::new().unwrap();
        std::fs::write(victim.path().join("keep.txt"), "data").unwrap();

        let bad_ids = [
            victim.path().to_string_lossy().into_owned(),
            ".".to_string(),
            "..".to_string(),
            "a/b".to_string(),
        ];
        for bad_id in bad_ids {
            let result = ctx
                .scheduler
                .submit(
                    Some(bad_id),
                    ContainerSpec::new("alpine"),
                    Default::default(),
                    GpuSpec::default(),
                )
                .await;
            assert!(matches!(result, Err(SchedulerError::InvalidRequest(_))));
        }

        assert_eq!(ctx.scheduler.stores().queue.len().await.unwrap(), 0);
        assert!(victim.path().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_recover_orphans_requeues_in_order_and_fails_cron_runs() {
        let ctx = TestContext::new(&["0"]);
        let stores = ctx.scheduler.stores();
        submit(&ctx.scheduler, "waiting", GpuSpec::default()).await;

        let mut first = record("first");
        first.worker_id = Some("2".to_string());
        first.gpu_ids = vec!["0".to_string()];
        let mut second = record("second");
        second.worker_id = Some("3".to_string());
        let mut nightly = record("nightly_1700000000");
        nightly.worker_id = Some("cron_0".to_string());
        for orphan in [first, second, nightly] {
            stores.running.set(orphan).await.unwrap();
        }

        let (requeued, failed) = ctx.scheduler.recover_orphans().await.unwrap();

        assert_eq!((requeued, failed), (2, 1));
        assert!(stores.running.items().await.unwrap().is_empty());
        let queue: Vec<String> = stores
            .queue
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.job_id)
            .collect();
        assert_eq!(queue, vec!["first", "second", "waiting"]);

        let record = stores.failed.get("nightly_1700000000").await.unwrap().unwrap();
        assert!(record.end_time.is_some());
        assert_eq!(ctx.observer.events_for("nightly_1700000000"), vec!["failed"]);

        // GPUs of the dead runs were never leased by this daemon
        assert_eq!(ctx.scheduler.gpus().available(), 1);
        assert_eq!(ctx.scheduler.recover_orphans().await.unwrap(), (0, 0));
    }
}
