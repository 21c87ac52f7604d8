//! Schedule Service
//!
//! Recurring job operations backed by the cron worker manager.

use berth_core::domain::schedule::CronState;
use berth_core::dto::schedule::{CreateScheduledJob, CronStatus};
use serde_json::Value;

use super::AppState;
use crate::error::Result;

pub async fn create_scheduled_job(state: &AppState, req: CreateScheduledJob) -> Result<CronStatus> {
    state.cron.add_cron_worker(req).await
}

pub async fn list_scheduled_jobs(state: &AppState) -> Vec<CronStatus> {
    state.cron.list().await
}

pub async fn get_scheduled_job(state: &AppState, job_id: &str) -> Result<CronStatus> {
    state.cron.status(job_id).await
}

/// Pauses or resumes a scheduled job
pub async fn set_status(state: &AppState, job_id: &str, status: CronState) -> Result<CronStatus> {
    state.cron.set_state(job_id, status).await
}

pub async fn reschedule(state: &AppState, job_id: &str, schedule: &Value) -> Result<CronStatus> {
    state.cron.reschedule(job_id, schedule).await
}

pub async fn delete_scheduled_job(state: &AppState, job_id: &str) -> Result<()> {
    state.cron.delete_cron_job(job_id).await
}
