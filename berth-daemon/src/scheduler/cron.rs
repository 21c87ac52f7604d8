//! Cron worker manager
//!
//! A cron worker owns one scheduled job and a tokio task that sleeps until
//! the next fire time. Every firing materializes a fresh one-shot run:
//! - job id `{job_id}_{unix timestamp of the fire time}`
//! - a copy of the scheduled job's working directory under that id
//! - the spec rewritten to point at the copy
//!
//! and hands it to the execution driver. Firings missed while a previous run
//! was still going are coalesced into one.
//!
//! Every change to a cron worker is written to the schedule store, so
//! [`CronWorkerManager::recover`] can rebuild the same set after a restart.

use berth_core::domain::job::{JobLogs, JobRecord, QueueEntry};
use berth_core::domain::schedule::{CronRecord, CronSchedule, CronState, ScheduledJob};
use berth_core::dto::schedule::{CreateScheduledJob, CronStatus};
use berth_core::trigger::{CronTrigger, TriggerError};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, Notify, watch};
use tracing::{debug, error, info, warn};

use super::Scheduler;
use super::driver::{self, ActiveRun};
use crate::error::{Result, SchedulerError};
use crate::repository::ScheduleStore;
use crate::workspace::is_valid_job_id;

const WORKER_ID_PREFIX: &str = "cron_";

/// Upcoming fire times reported in a status
const UPCOMING_RUNS: usize = 3;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn worker_id(index: u32) -> String {
    format!("{}{}", WORKER_ID_PREFIX, index)
}

/// True for ids handed out to cron workers
pub(crate) fn is_cron_worker_id(worker_id: &str) -> bool {
    parse_index(worker_id).is_some()
}

fn parse_index(worker_id: &str) -> Option<u32> {
    worker_id.strip_prefix(WORKER_ID_PREFIX)?.parse().ok()
}

/// One scheduled job and its firing task
struct CronWorker {
    index: u32,
    worker_id: String,
    record: Mutex<CronRecord>,
    trigger: Mutex<CronTrigger>,
    current: Mutex<Option<Arc<ActiveRun>>>,
    /// Signalled whenever the next fire time changes
    wake: Notify,
    shutdown: watch::Sender<bool>,
}

impl CronWorker {
    fn new(index: u32, record: CronRecord, trigger: CronTrigger) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            index,
            worker_id: record.worker_id.clone(),
            record: Mutex::new(record),
            trigger: Mutex::new(trigger),
            current: Mutex::new(None),
            wake: Notify::new(),
            shutdown,
        })
    }

    fn record(&self) -> CronRecord {
        lock(&self.record).clone()
    }

    fn job_id(&self) -> String {
        lock(&self.record).job.job_id.clone()
    }

    fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.record).next_fire_time
    }

    fn set_next_fire_time(&self, next: Option<DateTime<Utc>>) -> CronRecord {
        let record = {
            let mut record = lock(&self.record);
            record.next_fire_time = next;
            record.clone()
        };
        self.wake.notify_one();
        record
    }

    fn running(&self) -> Option<Arc<ActiveRun>> {
        lock(&self.current).clone()
    }

    /// Claims the pending firing if it is due, advancing to the next one
    ///
    /// Returns the fire time and the scheduled job to run.
    fn take_due(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, ScheduledJob)> {
        let trigger = lock(&self.trigger);
        let mut record = lock(&self.record);

        let due = record.next_fire_time.filter(|due| *due <= now)?;

        let next = match trigger.next_fire_time(Some(due), now) {
            Some(next) if next < now => trigger.next_fire_time(None, now),
            next => next,
        };
        record.next_fire_time = next;

        Some((due, record.job.clone()))
    }

    /// True once the trigger has no fire time left at all
    fn is_exhausted(&self, now: DateTime<Utc>) -> bool {
        self.next_fire_time().is_none() && lock(&self.trigger).next_fire_time(None, now).is_none()
    }

    fn status(&self) -> CronStatus {
        let record = self.record();
        let trigger = lock(&self.trigger);

        let next_run_times = match record.next_fire_time {
            Some(next) => trigger
                .upcoming(next, UPCOMING_RUNS)
                .iter()
                .map(DateTime::timestamp)
                .collect(),
            None => Vec::new(),
        };

        CronStatus {
            worker_id: self.worker_id.clone(),
            job_id: record.job.job_id.clone(),
            status: record.state(),
            next_run_time: record.next_fire_time.map(|next| next.timestamp()),
            next_run_times,
            schedule: trigger.describe(),
            properties: record.job,
        }
    }
}

/// Registry of cron workers, bounded by the configured capacity
pub struct CronWorkerManager {
    me: Weak<CronWorkerManager>,
    scheduler: Arc<Scheduler>,
    store: Arc<dyn ScheduleStore>,
    capacity: usize,
    workers: AsyncMutex<BTreeMap<u32, Arc<CronWorker>>>,
}

impl CronWorkerManager {
    pub fn new(scheduler: Arc<Scheduler>) -> Arc<Self> {
        let store = Arc::clone(&scheduler.stores().schedules);
        let capacity = scheduler.config().max_scheduled_jobs;

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            scheduler,
            store,
            capacity,
            workers: AsyncMutex::new(BTreeMap::new()),
        })
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Schedules a job
    ///
    /// # Errors
    /// - [`SchedulerError::InvalidSchedule`] if the schedule is malformed or
    ///   never fires
    /// - [`SchedulerError::CapacityExceeded`] if the cron worker limit is
    ///   reached
    /// - [`SchedulerError::AlreadyScheduled`] if the job id has a cron worker
    /// - [`SchedulerError::MissingBundle`] if the job has no working directory
    pub async fn add_cron_worker(&self, request: CreateScheduledJob) -> Result<CronStatus> {
        if !is_valid_job_id(&request.job_id) {
            return Err(SchedulerError::InvalidRequest(format!(
                "'{}' is not a valid job id",
                request.job_id
            )));
        }
        request
            .gpu_spec
            .requested()
            .map_err(|e| SchedulerError::InvalidRequest(e.to_string()))?;

        let now = Utc::now();
        let (schedule, trigger) = build_trigger(&request.schedule)?;
        let next = trigger
            .next_fire_time(None, now)
            .ok_or(TriggerError::NeverFires)?;

        let mut workers = self.workers.lock().await;

        if workers.len() >= self.capacity {
            return Err(SchedulerError::CapacityExceeded(self.capacity));
        }
        if workers.values().any(|w| w.job_id() == request.job_id) {
            return Err(SchedulerError::AlreadyScheduled(request.job_id));
        }
        if !self.scheduler.workspace().has_job_dir(&request.job_id) {
            return Err(SchedulerError::MissingBundle(request.job_id));
        }

        let index = workers.keys().next_back().map_or(0, |highest| highest + 1);
        let record = CronRecord {
            worker_id: worker_id(index),
            job: ScheduledJob {
                job_id: request.job_id,
                spec: request.spec,
                schedule,
                metadata: request.metadata,
                gpu_spec: request.gpu_spec,
            },
            next_fire_time: Some(next),
        };
        self.store.save(&record).await?;

        let worker = CronWorker::new(index, record, trigger);
        workers.insert(index, Arc::clone(&worker));
        self.spawn(Arc::clone(&worker));

        info!(
            worker_id = %worker.worker_id,
            job_id = %worker.job_id(),
            next_run = %next,
            "Cron worker added"
        );
        Ok(worker.status())
    }

    /// Removes a scheduled job; a run already in progress finishes
    pub async fn delete_cron_job(&self, job_id: &str) -> Result<()> {
        let worker = {
            let mut workers = self.workers.lock().await;
            let index = workers
                .values()
                .find(|w| w.job_id() == job_id)
                .map(|w| w.index)
                .ok_or_else(|| SchedulerError::CronJobNotFound(job_id.to_string()))?;
            workers
                .remove(&index)
                .ok_or_else(|| SchedulerError::CronJobNotFound(job_id.to_string()))?
        };

        worker.shutdown.send_replace(true);
        self.store.remove(&worker.worker_id).await?;

        info!(worker_id = %worker.worker_id, job_id, "Cron worker deleted");
        Ok(())
    }

    /// Rebuilds the cron workers persisted by a previous process
    ///
    /// Active schedules resume from now, skipping firings missed while the
    /// daemon was down; schedules that can no longer fire are dropped.
    /// Paused schedules stay paused. Returns the number of workers restored.
    pub async fn recover(&self) -> Result<usize> {
        let records = self.store.load_all().await?;
        let now = Utc::now();
        let mut workers = self.workers.lock().await;
        let mut restored = 0;

        for mut record in records {
            let Some(index) = parse_index(&record.worker_id) else {
                warn!(worker_id = %record.worker_id, "Skipping schedule with unrecognized worker id");
                continue;
            };
            if workers.contains_key(&index) {
                continue;
            }
            if !is_valid_job_id(&record.job.job_id) {
                error!(worker_id = %record.worker_id, job_id = %record.job.job_id, "Dropping schedule with invalid job id");
                self.store.remove(&record.worker_id).await?;
                continue;
            }

            let trigger = match CronTrigger::new(record.job.schedule.clone()) {
                Ok(trigger) => trigger,
                Err(e) => {
                    error!(worker_id = %record.worker_id, "Dropping unreadable schedule: {}", e);
                    self.store.remove(&record.worker_id).await?;
                    continue;
                }
            };

            if record.state() == CronState::Active {
                match trigger.next_fire_time(None, now) {
                    Some(next) => record.next_fire_time = Some(next),
                    None => {
                        info!(worker_id = %record.worker_id, "Dropping expired schedule");
                        self.store.remove(&record.worker_id).await?;
                        continue;
                    }
                }
                self.store.save(&record).await?;
            }

            let worker = CronWorker::new(index, record, trigger);
            workers.insert(index, Arc::clone(&worker));
            self.spawn(worker);
            restored += 1;
        }

        if restored > 0 {
            info!(count = restored, "Recovered cron workers");
        }
        Ok(restored)
    }

    // =========================================================================
    // State changes
    // =========================================================================

    /// Stops a scheduled job from firing until resumed
    pub async fn pause(&self, job_id: &str) -> Result<CronStatus> {
        let worker = self.find(job_id).await?;

        let record = worker.set_next_fire_time(None);
        self.store.save(&record).await?;

        info!(worker_id = %worker.worker_id, "Cron worker paused");
        Ok(worker.status())
    }

    /// Re-arms a scheduled job from now
    ///
    /// # Errors
    /// [`SchedulerError::ExpiredTrigger`] if the schedule can never fire
    /// again; the cron worker is removed in that case
    pub async fn resume(&self, job_id: &str) -> Result<CronStatus> {
        let worker = self.find(job_id).await?;
        let now = Utc::now();

        let next = lock(&worker.trigger).next_fire_time(None, now);
        let Some(next) = next else {
            self.deregister(&worker).await?;
            warn!(worker_id = %worker.worker_id, "Resumed schedule has expired, removed");
            return Err(SchedulerError::ExpiredTrigger(job_id.to_string()));
        };

        let record = worker.set_next_fire_time(Some(next));
        self.store.save(&record).await?;

        info!(worker_id = %worker.worker_id, next_run = %next, "Cron worker resumed");
        Ok(worker.status())
    }

    /// Applies an active/paused status change
    pub async fn set_state(&self, job_id: &str, state: CronState) -> Result<CronStatus> {
        match state {
            CronState::Active => self.resume(job_id).await,
            CronState::Paused => self.pause(job_id).await,
        }
    }

    /// Replaces the schedule of a scheduled job
    ///
    /// The worker id and job id are kept. A paused job stays paused. On
    /// invalid input nothing changes.
    pub async fn reschedule(&self, job_id: &str, schedule: &Value) -> Result<CronStatus> {
        let worker = self.find(job_id).await?;
        let now = Utc::now();

        let (schedule, trigger) = build_trigger(schedule)?;
        let next = trigger
            .next_fire_time(None, now)
            .ok_or(TriggerError::NeverFires)?;

        let record = {
            let mut current = lock(&worker.trigger);
            let mut record = lock(&worker.record);
            record.job.schedule = schedule;
            if record.next_fire_time.is_some() {
                record.next_fire_time = Some(next);
            }
            *current = trigger;
            record.clone()
        };
        worker.wake.notify_one();
        self.store.save(&record).await?;

        info!(worker_id = %worker.worker_id, "Cron worker rescheduled");
        Ok(worker.status())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn status(&self, job_id: &str) -> Result<CronStatus> {
        Ok(self.find(job_id).await?.status())
    }

    /// Status of every cron worker, by worker index
    pub async fn list(&self) -> Vec<CronStatus> {
        self.workers
            .lock()
            .await
            .values()
            .map(|worker| worker.status())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// The in-flight materialized run with this job id, if any
    pub async fn running_job(&self, job_id: &str) -> Option<Arc<ActiveRun>> {
        self.workers
            .lock()
            .await
            .values()
            .filter_map(|worker| worker.running())
            .find(|run| run.job_id() == job_id)
    }

    /// Stops an in-flight materialized run; it is recorded as failed
    pub async fn stop_run(&self, job_id: &str) -> Result<()> {
        let run = self
            .running_job(job_id)
            .await
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;

        if !driver::stop(&self.scheduler, &run, false).await? {
            return Err(SchedulerError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Ends every firing task; persisted schedules are kept
    pub async fn shutdown(&self) {
        for worker in self.workers.lock().await.values() {
            worker.shutdown.send_replace(true);
        }
    }

    async fn find(&self, job_id: &str) -> Result<Arc<CronWorker>> {
        self.workers
            .lock()
            .await
            .values()
            .find(|w| w.job_id() == job_id)
            .cloned()
            .ok_or_else(|| SchedulerError::CronJobNotFound(job_id.to_string()))
    }

    /// Removes a worker from the registry and the store
    async fn deregister(&self, worker: &Arc<CronWorker>) -> Result<()> {
        {
            let mut workers = self.workers.lock().await;
            if workers
                .get(&worker.index)
                .is_some_and(|held| Arc::ptr_eq(held, worker))
            {
                workers.remove(&worker.index);
            }
        }
        worker.shutdown.send_replace(true);
        self.store.remove(&worker.worker_id).await?;
        Ok(())
    }

    // =========================================================================
    // Firing
    // =========================================================================

    fn spawn(&self, worker: Arc<CronWorker>) {
        let manager = self.me.clone();
        tokio::spawn(async move { fire_loop(manager, worker).await });
    }

    /// Runs one firing of a scheduled job to completion
    async fn fire(&self, worker: &CronWorker, job: ScheduledJob, fired_at: DateTime<Utc>) {
        let scheduler = &self.scheduler;
        let run_id = format!("{}_{}", job.job_id, fired_at.timestamp());

        match scheduler.job_exists(&run_id).await {
            Ok(false) => {}
            Ok(true) => {
                warn!(worker_id = %worker.worker_id, job_id = %run_id, "Run already exists, skipping firing");
                return;
            }
            Err(e) => {
                error!(worker_id = %worker.worker_id, "Failed to check for run {}: {}", run_id, e);
                return;
            }
        }

        let spec = job
            .spec
            .materialized(&run_id, &scheduler.config().job_source_mount);
        let entry = QueueEntry::new(run_id.clone(), spec, job.metadata.clone(), job.gpu_spec.clone());

        let requested = match job.gpu_spec.requested() {
            Ok(requested) => requested,
            Err(e) => return self.fail_firing(entry, e.to_string()).await,
        };
        let total = scheduler.gpus().total();
        if requested > total {
            let reason = format!(
                "Job requires {} GPU(s) but only {} GPU(s) are available on this host",
                requested, total
            );
            return self.fail_firing(entry, reason).await;
        }
        let Some(lease) = scheduler.gpus().try_lock(requested) else {
            warn!(
                worker_id = %worker.worker_id,
                requested,
                available = scheduler.gpus().available(),
                "Not enough free GPUs, skipping firing"
            );
            return;
        };

        let workspace = scheduler.workspace().clone();
        let (from, to) = (job.job_id.clone(), run_id.clone());
        let copied = tokio::task::spawn_blocking(move || workspace.copy_job_dir(&from, &to)).await;
        let copy_error = match copied {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(e) = copy_error {
            drop(lease);
            return self
                .fail_firing(entry, format!("Failed to prepare working directory: {}", e))
                .await;
        }

        let run = match driver::start(scheduler, entry, lease, &worker.worker_id).await {
            Ok(run) => run,
            Err(e) => {
                error!(worker_id = %worker.worker_id, job_id = %run_id, "Failed to start run: {}", e);
                return;
            }
        };

        *lock(&worker.current) = Some(Arc::clone(&run));
        driver::run_to_completion(scheduler, &run).await;
        *lock(&worker.current) = None;
    }

    /// Records a firing that could not run
    async fn fail_firing(&self, entry: QueueEntry, reason: String) {
        warn!(job_id = %entry.job_id, "Scheduled run cannot start: {}", reason);

        let mut record = JobRecord::from(entry);
        record.end_time = Some(Utc::now());
        record.logs = Some(JobLogs::Text(reason));

        match self.scheduler.stores().failed.set(record.clone()).await {
            Ok(()) => self.scheduler.observers().failed(&record),
            Err(e) => error!(job_id = %record.job_id, "Failed to record failed run: {}", e),
        }
    }
}

/// Parses a schedule request into a schedule and its trigger
fn build_trigger(value: &Value) -> Result<(CronSchedule, CronTrigger)> {
    let schedule = CronSchedule::from_value(value)?;
    let trigger = CronTrigger::new(schedule.clone())?;
    Ok((schedule, trigger))
}

async fn sleep_until(at: Option<DateTime<Utc>>) {
    match at {
        Some(at) => {
            let delay = (at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(delay).await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn fire_loop(manager: Weak<CronWorkerManager>, worker: Arc<CronWorker>) {
    let mut shutdown = worker.shutdown.subscribe();

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = worker.wake.notified() => continue,
            _ = sleep_until(worker.next_fire_time()) => {}
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };

        let now = Utc::now();
        let Some((due, job)) = worker.take_due(now) else {
            continue;
        };

        let record = worker.record();
        if let Err(e) = manager.store.save(&record).await {
            error!(worker_id = %worker.worker_id, "Failed to persist next fire time: {}", e);
        }

        info!(worker_id = %worker.worker_id, job_id = %job.job_id, "Cron worker firing");
        manager.fire(&worker, job, due).await;

        if worker.is_exhausted(Utc::now()) {
            info!(worker_id = %worker.worker_id, "Schedule exhausted, removing cron worker");
            if let Err(e) = manager.deregister(&worker).await {
                error!(worker_id = %worker.worker_id, "Failed to remove exhausted schedule: {}", e);
            }
            break;
        }
    }

    debug!(worker_id = %worker.worker_id, "Cron worker loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestContext, eventually};
    use berth_core::domain::job::GpuSpec;
    use berth_core::domain::spec::{ContainerSpec, JOB_ID_ENV, VolumeBinding};
    use serde_json::json;

    fn scheduled(ctx: &TestContext, job_id: &str, schedule: Value) -> CreateScheduledJob {
        std::fs::create_dir_all(ctx.scheduler.workspace().job_dir(job_id).unwrap()).unwrap();

        let mut spec = ContainerSpec::new("alpine");
        spec.volumes.insert(
            ctx.scheduler.workspace().job_dir(job_id).unwrap().display().to_string(),
            VolumeBinding {
                bind: ctx.scheduler.config().job_source_mount.clone(),
                mode: "rw".to_string(),
            },
        );

        CreateScheduledJob {
            job_id: job_id.to_string(),
            spec,
            schedule,
            metadata: Default::default(),
            gpu_spec: GpuSpec::default(),
        }
    }

    fn record(worker_id: &str, job_id: &str, schedule: Value, next: Option<DateTime<Utc>>) -> CronRecord {
        CronRecord {
            worker_id: worker_id.to_string(),
            job: ScheduledJob {
                job_id: job_id.to_string(),
                spec: ContainerSpec::new("alpine"),
                schedule: CronSchedule::from_value(&schedule).unwrap(),
                metadata: Default::default(),
                gpu_spec: GpuSpec::default(),
            },
            next_fire_time: next,
        }
    }

    #[tokio::test]
    async fn test_add_validates_request() {
        let ctx = TestContext::new(&[]);
        let manager = CronWorkerManager::new(ctx.scheduler.clone());

        let missing = CreateScheduledJob {
            job_id: "nobundle".to_string(),
            spec: ContainerSpec::new("alpine"),
            schedule: json!({"hour": 3}),
            metadata: Default::default(),
            gpu_spec: GpuSpec::default(),
        };
        assert!(matches!(
            manager.add_cron_worker(missing).await,
            Err(SchedulerError::MissingBundle(_))
        ));

        let bad = scheduled(&ctx, "bad", json!({"minute": "61"}));
        assert!(matches!(
            manager.add_cron_worker(bad).await,
            Err(SchedulerError::InvalidSchedule(_))
        ));

        let empty = scheduled(&ctx, "empty", json!({}));
        assert!(matches!(
            manager.add_cron_worker(empty).await,
            Err(SchedulerError::InvalidSchedule(_))
        ));

        let past = scheduled(&ctx, "past", json!({"hour": 3, "end_date": "2001-01-01"}));
        assert!(matches!(
            manager.add_cron_worker(past).await,
            Err(SchedulerError::InvalidSchedule(TriggerError::NeverFires))
        ));

        for bad_id in ["..", ".", "/etc"] {
            let mut escaping = scheduled(&ctx, "escaping", json!({"hour": 3}));
            escaping.job_id = bad_id.to_string();
            assert!(matches!(
                manager.add_cron_worker(escaping).await,
                Err(SchedulerError::InvalidRequest(_))
            ));
        }

        assert_eq!(manager.len().await, 0);
        assert!(ctx.scheduler.stores().schedules.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_and_duplicates() {
        let ctx = TestContext::new(&[]);
        let manager = CronWorkerManager::new(ctx.scheduler.clone());
        let capacity = ctx.scheduler.config().max_scheduled_jobs;

        for i in 0..capacity {
            let status = manager
                .add_cron_worker(scheduled(&ctx, &format!("job-{}", i), json!({"hour": 3})))
                .await
                .unwrap();
            assert_eq!(status.worker_id, format!("cron_{}", i));
        }

        assert!(matches!(
            manager
                .add_cron_worker(scheduled(&ctx, "one-too-many", json!({"hour": 3})))
                .await,
            Err(SchedulerError::CapacityExceeded(n)) if n == capacity
        ));
        assert_eq!(manager.len().await, capacity);

        manager.delete_cron_job("job-0").await.unwrap();
        assert!(matches!(
            manager
                .add_cron_worker(scheduled(&ctx, "job-1", json!({"hour": 4})))
                .await,
            Err(SchedulerError::AlreadyScheduled(_))
        ));
        assert_eq!(
            ctx.scheduler.stores().schedules.load_all().await.unwrap().len(),
            capacity - 1
        );
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_reports_schedule_and_upcoming_runs() {
        let ctx = TestContext::new(&[]);
        let manager = CronWorkerManager::new(ctx.scheduler.clone());

        let status = manager
            .add_cron_worker(scheduled(&ctx, "nightly", json!({"hour": 3})))
            .await
            .unwrap();

        assert_eq!(status.status, CronState::Active);
        assert_eq!(status.job_id, "nightly");
        assert_eq!(status.properties.job_id, "nightly");
        assert_eq!(status.schedule.get("hour").map(String::as_str), Some("3"));
        assert_eq!(status.schedule.get("minute").map(String::as_str), Some("0"));
        assert_eq!(status.next_run_times.len(), 3);
        assert_eq!(status.next_run_times[0], status.next_run_time.unwrap());
        assert_eq!(status.next_run_times[1] - status.next_run_times[0], 86_400);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let ctx = TestContext::new(&[]);
        let manager = CronWorkerManager::new(ctx.scheduler.clone());
        manager
            .add_cron_worker(scheduled(&ctx, "hourly", json!({"minute": 0})))
            .await
            .unwrap();

        let paused = manager.pause("hourly").await.unwrap();
        assert_eq!(paused.status, CronState::Paused);
        assert_eq!(paused.next_run_time, None);
        assert_eq!(manager.status("hourly").await.unwrap().status, CronState::Paused);

        let stored = ctx.scheduler.stores().schedules.load_all().await.unwrap();
        assert_eq!(stored[0].next_fire_time, None);

        let resumed = manager.set_state("hourly", CronState::Active).await.unwrap();
        assert_eq!(resumed.status, CronState::Active);
        let next = resumed.next_run_time.unwrap();
        let now = Utc::now().timestamp();
        assert!(next >= now && next <= now + 3600);

        assert!(matches!(
            manager.pause("unknown").await,
            Err(SchedulerError::CronJobNotFound(_))
        ));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_resume_expired_schedule_removes_worker() {
        let ctx = TestContext::new(&[]);
        let store = Arc::clone(&ctx.scheduler.stores().schedules);
        store
            .save(&record("cron_4", "old", json!({"hour": 3, "end_date": "2001-01-01"}), None))
            .await
            .unwrap();

        let manager = CronWorkerManager::new(ctx.scheduler.clone());
        assert_eq!(manager.recover().await.unwrap(), 1);
        assert_eq!(manager.status("old").await.unwrap().status, CronState::Paused);

        assert!(matches!(
            manager.resume("old").await,
            Err(SchedulerError::ExpiredTrigger(_))
        ));
        assert_eq!(manager.len().await, 0);
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reschedule_keeps_identity_and_rejects_bad_input() {
        let ctx = TestContext::new(&[]);
        let manager = CronWorkerManager::new(ctx.scheduler.clone());
        manager
            .add_cron_worker(scheduled(&ctx, "report", json!({"hour": 3})))
            .await
            .unwrap();

        assert!(matches!(
            manager.reschedule("report", &json!({"hour": "25"})).await,
            Err(SchedulerError::InvalidSchedule(_))
        ));
        let unchanged = manager.status("report").await.unwrap();
        assert_eq!(unchanged.schedule.get("hour").map(String::as_str), Some("3"));
        assert_eq!(unchanged.status, CronState::Active);

        let status = manager
            .reschedule("report", &json!({"hour": 5, "minute": 30}))
            .await
            .unwrap();
        assert_eq!(status.worker_id, "cron_0");
        assert_eq!(status.job_id, "report");
        assert_eq!(status.schedule.get("hour").map(String::as_str), Some("5"));
        assert_eq!(status.schedule.get("minute").map(String::as_str), Some("30"));

        manager.pause("report").await.unwrap();
        let status = manager.reschedule("report", &json!({"hour": 6})).await.unwrap();
        assert_eq!(status.status, CronState::Paused);

        let stored = ctx.scheduler.stores().schedules.load_all().await.unwrap();
        assert_eq!(stored[0].job.schedule.hour.as_ref().map(|h| h.to_string()).as_deref(), Some("6"));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_recover_restores_active_and_paused() {
        let ctx = TestContext::new(&[]);
        let store = Arc::clone(&ctx.scheduler.stores().schedules);
        let stale = Utc::now() - chrono::Duration::days(2);
        store
            .save(&record("cron_2", "active", json!({"hour": 3}), Some(stale)))
            .await
            .unwrap();
        store
            .save(&record("cron_5", "paused", json!({"hour": 4}), None))
            .await
            .unwrap();
        store
            .save(&record("bogus", "ignored", json!({"hour": 4}), None))
            .await
            .unwrap();

        let manager = CronWorkerManager::new(ctx.scheduler.clone());
        assert_eq!(manager.recover().await.unwrap(), 2);

        let statuses = manager.list().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].worker_id, "cron_2");
        assert_eq!(statuses[0].status, CronState::Active);
        // Missed firings are skipped
        assert!(statuses[0].next_run_time.unwrap() >= Utc::now().timestamp() - 1);
        assert_eq!(statuses[1].worker_id, "cron_5");
        assert_eq!(statuses[1].status, CronState::Paused);

        // New workers continue after the highest recovered index
        let status = manager
            .add_cron_worker(scheduled(&ctx, "fresh", json!({"hour": 1})))
            .await
            .unwrap();
        assert_eq!(status.worker_id, "cron_6");
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_recovered_schedule_keeps_firing() {
        let ctx = TestContext::new(&[]);
        let store = Arc::clone(&ctx.scheduler.stores().schedules);
        std::fs::create_dir_all(ctx.scheduler.workspace().job_dir("heartbeat").unwrap()).unwrap();
        let stale = Utc::now() - chrono::Duration::hours(1);
        store
            .save(&record("cron_1", "heartbeat", json!({"second": "*"}), Some(stale)))
            .await
            .unwrap();
        store
            .save(&record("cron_4", "..", json!({"second": "*"}), None))
            .await
            .unwrap();

        let manager = CronWorkerManager::new(ctx.scheduler.clone());
        assert_eq!(manager.recover().await.unwrap(), 1);
        assert_eq!(store.load_all().await.unwrap().len(), 1);

        let stores = ctx.scheduler.stores().clone();
        eventually(|| async {
            stores
                .completed
                .items()
                .await
                .unwrap()
                .iter()
                .any(|record| record.job_id.starts_with("heartbeat_"))
        })
        .await;
        manager.pause("heartbeat").await.unwrap();

        let record = stores.completed.items().await.unwrap().remove(0);
        assert_eq!(record.worker_id.as_deref(), Some("cron_1"));
        // Only the resumed firings ran, not the hour missed while down
        assert!(stores.completed.items().await.unwrap().len() < 10);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_firing_materializes_fresh_run() {
        let ctx = TestContext::new(&[]);
        let manager = CronWorkerManager::new(ctx.scheduler.clone());
        manager
            .add_cron_worker(scheduled(&ctx, "tick", json!({"second": "*"})))
            .await
            .unwrap();

        let stores = ctx.scheduler.stores().clone();
        eventually(|| async { !stores.completed.items().await.unwrap().is_empty() }).await;
        manager.pause("tick").await.unwrap();

        let record = stores.completed.items().await.unwrap().remove(0);
        assert!(record.job_id.starts_with("tick_"), "job id: {}", record.job_id);
        assert_eq!(record.worker_id.as_deref(), Some("cron_0"));

        let spec = ctx.backend.started_spec(&record.job_id).unwrap();
        assert_eq!(spec.environment.get(JOB_ID_ENV), Some(&record.job_id));
        let expected_host = ctx
            .scheduler
            .workspace()
            .job_dir(&record.job_id)
            .unwrap()
            .display()
            .to_string();
        assert!(spec.volumes.contains_key(&expected_host));

        // The base bundle stays, the per-run copy is cleaned up
        assert!(ctx.scheduler.workspace().has_job_dir("tick"));
        assert!(!ctx.scheduler.workspace().has_job_dir(&record.job_id));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_firing_requiring_too_many_gpus_is_recorded_failed() {
        let ctx = TestContext::new(&["0"]);
        let manager = CronWorkerManager::new(ctx.scheduler.clone());
        let mut request = scheduled(&ctx, "greedy", json!({"second": "*"}));
        request.gpu_spec = GpuSpec::with_gpus(4);
        manager.add_cron_worker(request).await.unwrap();

        let stores = ctx.scheduler.stores().clone();
        eventually(|| async { !stores.failed.items().await.unwrap().is_empty() }).await;
        manager.pause("greedy").await.unwrap();

        let record = stores.failed.items().await.unwrap().remove(0);
        assert!(record.job_id.starts_with("greedy_"));
        assert!(ctx.backend.started().is_empty());
        assert_eq!(ctx.scheduler.gpus().available(), 1);
        manager.shutdown().await;
    }
}
