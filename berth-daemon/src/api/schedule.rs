//! Scheduled Job API Handlers
//!
//! HTTP endpoints for recurring jobs.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use berth_core::dto::schedule::{CreateScheduledJob, CronStatus, RescheduleJob, UpdateScheduleStatus};

use crate::api::error::ApiResult;
use crate::service::{AppState, schedule_service};

/// POST /scheduled_jobs
/// Schedule a job whose bundle is already in place
pub async fn create_scheduled_job(
    State(state): State<AppState>,
    Json(req): Json<CreateScheduledJob>,
) -> ApiResult<(StatusCode, Json<CronStatus>)> {
    tracing::info!("Scheduling job: {}", req.job_id);

    let status = schedule_service::create_scheduled_job(&state, req).await?;

    Ok((StatusCode::CREATED, Json(status)))
}

/// GET /scheduled_jobs
pub async fn list_scheduled_jobs(State(state): State<AppState>) -> Json<Vec<CronStatus>> {
    Json(schedule_service::list_scheduled_jobs(&state).await)
}

/// GET /scheduled_jobs/{job_id}
pub async fn get_scheduled_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CronStatus>> {
    Ok(Json(schedule_service::get_scheduled_job(&state, &job_id).await?))
}

/// PUT /scheduled_jobs/{job_id}/status
/// Pause or resume a scheduled job
pub async fn update_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(req): Json<UpdateScheduleStatus>,
) -> ApiResult<Json<CronStatus>> {
    tracing::info!("Setting scheduled job {} to {}", job_id, req.status);

    Ok(Json(
        schedule_service::set_status(&state, &job_id, req.status).await?,
    ))
}

/// PATCH /scheduled_jobs/{job_id}
/// Replace the schedule of a scheduled job
pub async fn reschedule_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(req): Json<RescheduleJob>,
) -> ApiResult<Json<CronStatus>> {
    tracing::info!("Rescheduling job: {}", job_id);

    Ok(Json(
        schedule_service::reschedule(&state, &job_id, &req.schedule).await?,
    ))
}

/// DELETE /scheduled_jobs/{job_id}
pub async fn delete_scheduled_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting scheduled job: {}", job_id);

    schedule_service::delete_scheduled_job(&state, &job_id).await?;

    Ok(StatusCode::NO_CONTENT)
}
