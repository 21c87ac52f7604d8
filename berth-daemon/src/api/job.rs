//! Job API Handlers
//!
//! HTTP endpoints for queued, running and finished jobs.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use berth_core::domain::job::{JobRecord, JobStatus, QueueEntry};
use berth_core::dto::job::{
    ContainerInfo, JobLogsView, JobSubmitted, JobView, QueuedJob, RepositionJob, SortQuery,
    StopQuery, SubmitJob,
};

use crate::api::error::ApiResult;
use crate::service::{AppState, job_service};

// =============================================================================
// Queue Endpoints
// =============================================================================

/// POST /queued_jobs
/// Append a job to the queue
pub async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJob>,
) -> ApiResult<(StatusCode, Json<JobSubmitted>)> {
    tracing::debug!("Submitting job for image: {}", req.spec.image);

    let submitted = job_service::submit_job(&state, req).await?;

    Ok((StatusCode::CREATED, Json(submitted)))
}

/// GET /queued_jobs
/// List queued jobs in dispatch order
pub async fn list_queued_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<QueuedJob>>> {
    Ok(Json(job_service::list_queued(&state).await?))
}

/// GET /queued_jobs/{position}
pub async fn get_queued_job(
    State(state): State<AppState>,
    Path(position): Path<usize>,
) -> ApiResult<Json<QueuedJob>> {
    Ok(Json(job_service::get_queued(&state, position).await?))
}

/// PATCH /queued_jobs/{position}
/// Move a queued job to another position
pub async fn reposition_job(
    State(state): State<AppState>,
    Path(position): Path<usize>,
    Json(req): Json<RepositionJob>,
) -> ApiResult<StatusCode> {
    tracing::info!("Moving queued job from {} to {}", position, req.position);

    job_service::reposition(&state, position, req.position).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /queued_jobs/{position}
pub async fn delete_queued_job(
    State(state): State<AppState>,
    Path(position): Path<usize>,
) -> ApiResult<Json<QueueEntry>> {
    Ok(Json(job_service::delete_queued(&state, position).await?))
}

// =============================================================================
// Running Job Endpoints
// =============================================================================

/// GET /running_jobs
pub async fn list_running_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<JobRecord>>> {
    Ok(Json(job_service::list_running(&state).await?))
}

/// DELETE /running_jobs/{job_id}?reschedule=
/// Stop a running job, optionally putting it back at the head of the queue
pub async fn stop_running_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<StopQuery>,
) -> ApiResult<StatusCode> {
    tracing::info!("Stopping job {} (reschedule: {})", job_id, query.reschedule);

    job_service::stop_running(&state, &job_id, query.reschedule).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /running_jobs/{job_id}/logs
pub async fn get_running_logs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobLogsView>> {
    Ok(Json(job_service::running_logs(&state, &job_id).await?))
}

/// GET /running_jobs/{job_id}/container_id
pub async fn get_container_id(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ContainerInfo>> {
    Ok(Json(job_service::container_id(&state, &job_id).await?))
}

// =============================================================================
// Finished Job Endpoints
// =============================================================================

/// GET /completed_jobs?sort=field[:asc|desc],...
pub async fn list_completed_jobs(
    State(state): State<AppState>,
    Query(query): Query<SortQuery>,
) -> ApiResult<Json<Vec<JobRecord>>> {
    Ok(Json(
        job_service::list_completed(&state, query.sort.as_deref()).await?,
    ))
}

/// GET /failed_jobs?sort=field[:asc|desc],...
pub async fn list_failed_jobs(
    State(state): State<AppState>,
    Query(query): Query<SortQuery>,
) -> ApiResult<Json<Vec<JobRecord>>> {
    Ok(Json(
        job_service::list_failed(&state, query.sort.as_deref()).await?,
    ))
}

/// GET /completed_jobs/{job_id}/logs
pub async fn get_completed_logs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobLogsView>> {
    Ok(Json(
        job_service::finished_logs(&state, &job_id, JobStatus::Completed).await?,
    ))
}

/// GET /failed_jobs/{job_id}/logs
pub async fn get_failed_logs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobLogsView>> {
    Ok(Json(
        job_service::finished_logs(&state, &job_id, JobStatus::Failed).await?,
    ))
}

/// DELETE /completed_jobs/{job_id} and /failed_jobs/{job_id}
/// Delete a finished job record along with its archive
pub async fn delete_finished_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting finished job: {}", job_id);

    job_service::delete_finished(&state, &job_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Unified Lookup
// =============================================================================

/// GET /jobs/{job_id}
/// Find a job in any state
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    tracing::debug!("Getting job: {}", job_id);

    Ok(Json(job_service::get_job(&state, &job_id).await?))
}
