//! Queue-polling worker
//!
//! Each worker runs at most one job at a time. On every tick of its poll
//! interval it tries to dispatch the queue head and, when it gets one, runs
//! it to completion before polling again.

use berth_core::dto::worker::{WorkerState, WorkerSummary};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use super::driver::{self, ActiveRun};
use super::{DeferReason, DispatchOutcome, Scheduler};
use crate::error::{Result, SchedulerError};

/// A queue-polling worker
pub struct Worker {
    id: u32,
    scheduler: Arc<Scheduler>,
    current: Mutex<Option<Arc<ActiveRun>>>,
    shutdown: watch::Sender<bool>,
}

impl Worker {
    /// Creates a worker and starts its poll loop
    ///
    /// # Arguments
    /// * `id` - Worker id, unique within the pool
    /// * `scheduler` - Shared scheduling state
    /// * `interval` - Time between two polls of the queue
    pub fn spawn(id: u32, scheduler: Arc<Scheduler>, interval: Duration) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        let worker = Arc::new(Self {
            id,
            scheduler,
            current: Mutex::new(None),
            shutdown,
        });

        let looping = Arc::clone(&worker);
        tokio::spawn(async move { looping.poll_loop(interval).await });

        info!(worker_id = id, "Worker started");
        worker
    }

    fn current(&self) -> MutexGuard<'_, Option<Arc<ActiveRun>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active_run(&self) -> Option<Arc<ActiveRun>> {
        self.current().clone()
    }

    async fn poll_loop(self: Arc<Self>, interval: Duration) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.poll_once().await {
                error!(worker_id = self.id, "Poll failed: {}", e);
            }
        }

        debug!(worker_id = self.id, "Worker loop exited");
    }

    /// Dispatches and runs at most one job
    ///
    /// Returns true if a job was taken from the queue.
    pub async fn poll_once(&self) -> Result<bool> {
        if self.active_run().is_some() {
            return Ok(false);
        }

        match self.scheduler.try_dispatch().await? {
            DispatchOutcome::Dispatched { entry, lease } => {
                let worker_id = self.id.to_string();
                let run = driver::start(&self.scheduler, entry, lease, &worker_id).await?;
                *self.current() = Some(Arc::clone(&run));

                driver::run_to_completion(&self.scheduler, &run).await;
                self.clear(&run);
                Ok(true)
            }
            DispatchOutcome::Deferred(DeferReason::EmptyQueue) => Ok(false),
            DispatchOutcome::Deferred(reason) => {
                debug!(worker_id = self.id, ?reason, "Dispatch deferred");
                Ok(false)
            }
            DispatchOutcome::PermanentFailure { job_id, reason } => {
                info!(worker_id = self.id, job_id = %job_id, "Dropped job that cannot run: {}", reason);
                Ok(false)
            }
        }
    }

    /// Empties the slot if it still holds `run`
    fn clear(&self, run: &Arc<ActiveRun>) {
        let mut current = self.current();
        if current.as_ref().is_some_and(|held| Arc::ptr_eq(held, run)) {
            *current = None;
        }
    }

    /// Idle, pending (job taken but not started) or running
    pub fn status(&self) -> WorkerState {
        state_of(self.active_run().as_ref())
    }

    /// Id of the job being run, if any
    pub fn job_id(&self) -> Option<String> {
        self.active_run().map(|run| run.job_id().to_string())
    }

    pub fn summary(&self) -> WorkerSummary {
        let run = self.active_run();
        WorkerSummary {
            worker_id: self.id,
            status: state_of(run.as_ref()),
            job_id: run.map(|run| run.job_id().to_string()),
        }
    }

    /// Live output of the running job
    pub async fn logs(&self) -> Result<String> {
        let run = self.busy_run()?;
        match run.handle() {
            Some(handle) => {
                let bytes = handle.logs().await?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            None => Ok(String::new()),
        }
    }

    /// Backend id of the running job's container
    pub fn container_id(&self) -> Result<Option<String>> {
        let run = self.busy_run()?;
        Ok(run.handle().map(|handle| handle.id().to_string()))
    }

    fn busy_run(&self) -> Result<Arc<ActiveRun>> {
        self.active_run().ok_or_else(|| {
            SchedulerError::InvalidRequest(format!("worker {} is idle", self.id))
        })
    }

    /// Stops the current job
    ///
    /// # Errors
    /// [`SchedulerError::JobNotFound`] if the job is already finishing
    pub async fn stop(&self, reschedule: bool) -> Result<String> {
        let run = self.busy_run()?;

        if !driver::stop(&self.scheduler, &run, reschedule).await? {
            return Err(SchedulerError::JobNotFound(run.job_id().to_string()));
        }

        self.clear(&run);
        Ok(run.job_id().to_string())
    }

    /// Stops the current job, if any, and ends the poll loop
    pub async fn delete(&self, reschedule: bool) -> Result<()> {
        if let Some(run) = self.active_run() {
            if driver::stop(&self.scheduler, &run, reschedule).await? {
                self.clear(&run);
            }
        }

        self.shutdown.send_replace(true);
        info!(worker_id = self.id, "Worker deleted");
        Ok(())
    }

    /// Ends the poll loop without touching the current job
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

fn state_of(run: Option<&Arc<ActiveRun>>) -> WorkerState {
    match run {
        None => WorkerState::Idle,
        Some(run) if run.handle().is_none() => WorkerState::Pending,
        Some(_) => WorkerState::Running,
    }
}
