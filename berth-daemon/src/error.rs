//! Scheduler error taxonomy

use berth_core::trigger::TriggerError;
use thiserror::Error;

use crate::backend::BackendError;
use crate::repository::StoreError;

/// Errors surfaced by scheduler, worker pool and cron operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("worker {0} not found")]
    WorkerNotFound(u32),

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("scheduled job {0} not found")]
    CronJobNotFound(String),

    #[error("job {0} already exists")]
    DuplicateJob(String),

    #[error("job {0} is already scheduled")]
    AlreadyScheduled(String),

    #[error("cannot schedule more than {0} jobs")]
    CapacityExceeded(usize),

    #[error(transparent)]
    InvalidSchedule(#[from] TriggerError),

    #[error("schedule of job {0} will never fire again; the scheduled job has been removed")]
    ExpiredTrigger(String),

    #[error("no job bundle found for {0}")]
    MissingBundle(String),

    #[error("bad sort request: {0}")]
    InvalidSort(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
