//! Worker pool
//!
//! Keeps the queue-polling workers by id. Ids are assigned as one more than
//! the highest id in use, or 0 for an empty pool.

use berth_core::dto::worker::WorkerSummary;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::{Scheduler, Worker};
use crate::error::{Result, SchedulerError};

/// Queue-polling workers by id
pub struct WorkerPool {
    scheduler: Arc<Scheduler>,
    workers: RwLock<BTreeMap<u32, Arc<Worker>>>,
}

impl WorkerPool {
    pub fn new(scheduler: Arc<Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            workers: RwLock::new(BTreeMap::new()),
        })
    }

    /// Starts a new worker and returns its id
    pub async fn add(&self) -> u32 {
        let mut workers = self.workers.write().await;

        let id = workers.keys().next_back().map_or(0, |highest| highest + 1);
        let worker = Worker::spawn(
            id,
            Arc::clone(&self.scheduler),
            self.scheduler.config().poll_interval,
        );
        workers.insert(id, worker);

        info!(worker_id = id, total = workers.len(), "Worker added");
        id
    }

    /// Removes a worker, stopping its job first
    ///
    /// # Arguments
    /// * `worker_id` - Worker to remove
    /// * `reschedule` - Put the worker's job back at the head of the queue
    ///   instead of recording it as failed
    pub async fn delete_worker(&self, worker_id: u32, reschedule: bool) -> Result<()> {
        let worker = self
            .workers
            .write()
            .await
            .remove(&worker_id)
            .ok_or(SchedulerError::WorkerNotFound(worker_id))?;

        worker.delete(reschedule).await
    }

    /// Worker currently running `job_id`
    pub async fn worker_by_job_id(&self, job_id: &str) -> Option<Arc<Worker>> {
        self.workers
            .read()
            .await
            .values()
            .find(|worker| worker.job_id().as_deref() == Some(job_id))
            .cloned()
    }

    /// Stops a running job wherever it runs
    pub async fn stop_job(&self, job_id: &str, reschedule: bool) -> Result<()> {
        let worker = self
            .worker_by_job_id(job_id)
            .await
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;

        worker.stop(reschedule).await?;
        Ok(())
    }

    pub async fn workers(&self) -> Vec<WorkerSummary> {
        self.workers
            .read()
            .await
            .values()
            .map(|worker| worker.summary())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Ends every poll loop; running jobs are left to finish
    pub async fn shutdown(&self) {
        for worker in self.workers.read().await.values() {
            worker.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBehavior, TestContext, eventually, submit};
    use berth_core::domain::job::GpuSpec;
    use berth_core::dto::worker::WorkerState;

    #[tokio::test]
    async fn test_worker_ids_follow_highest() {
        let ctx = TestContext::new(&[]);
        let pool = WorkerPool::new(ctx.scheduler.clone());

        assert_eq!(pool.add().await, 0);
        assert_eq!(pool.add().await, 1);
        assert_eq!(pool.add().await, 2);

        pool.delete_worker(1, false).await.unwrap();
        assert_eq!(pool.add().await, 3);

        pool.delete_worker(3, false).await.unwrap();
        pool.delete_worker(2, false).await.unwrap();
        assert_eq!(pool.add().await, 1);

        let ids: Vec<u32> = pool.workers().await.iter().map(|w| w.worker_id).collect();
        assert_eq!(ids, vec![0, 1]);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_unknown_worker() {
        let ctx = TestContext::new(&[]);
        let pool = WorkerPool::new(ctx.scheduler.clone());

        assert!(matches!(
            pool.delete_worker(7, false).await,
            Err(SchedulerError::WorkerNotFound(7))
        ));
    }

    #[tokio::test]
    async fn test_stop_job_by_id() {
        let ctx = TestContext::new(&[]);
        ctx.backend.script("long", FakeBehavior::Block);
        submit(&ctx.scheduler, "long", GpuSpec::default()).await;

        let pool = WorkerPool::new(ctx.scheduler.clone());
        pool.add().await;
        eventually(|| async {
            pool.workers().await[0].status == WorkerState::Running
        })
        .await;

        assert!(pool.worker_by_job_id("long").await.is_some());
        assert!(matches!(
            pool.stop_job("other", false).await,
            Err(SchedulerError::JobNotFound(_))
        ));

        pool.stop_job("long", false).await.unwrap();

        assert!(ctx.scheduler.stores().failed.contains("long").await.unwrap());
        assert!(pool.worker_by_job_id("long").await.is_none());
        assert_eq!(pool.len().await, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_gpu_jobs_run_concurrently_up_to_pool_size() {
        let ctx = TestContext::new(&["0", "1"]);
        ctx.backend.script("job", FakeBehavior::Block);
        for id in ["job-a", "job-b", "job-c"] {
            submit(&ctx.scheduler, id, GpuSpec::with_gpus(1)).await;
        }

        let pool = WorkerPool::new(ctx.scheduler.clone());
        for _ in 0..3 {
            pool.add().await;
        }

        let stores = ctx.scheduler.stores().clone();
        eventually(|| async { stores.running.items().await.unwrap().len() == 2 }).await;

        // The third job waits at the head until a GPU frees up
        tokio::time::sleep(ctx.scheduler.config().poll_interval * 3).await;
        assert_eq!(stores.running.items().await.unwrap().len(), 2);
        assert_eq!(stores.queue.peek_front().await.unwrap().job_id, "job-c");
        assert_eq!(ctx.scheduler.gpus().available(), 0);

        ctx.backend.release(0);
        eventually(|| async { stores.completed.items().await.unwrap().len() == 3 }).await;
        assert_eq!(ctx.scheduler.gpus().available(), 2);
        pool.shutdown().await;
    }
}
