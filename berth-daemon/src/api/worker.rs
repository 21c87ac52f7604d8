//! Worker API Handlers
//!
//! HTTP endpoints for the queue-polling worker pool.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use berth_core::dto::worker::{DeleteWorkerQuery, WorkerCreated, WorkerSummary};

use crate::api::error::ApiResult;
use crate::service::{AppState, worker_service};

/// GET /workers
pub async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerSummary>> {
    Json(worker_service::list_workers(&state).await)
}

/// POST /workers
/// Start a new worker
pub async fn add_worker(State(state): State<AppState>) -> (StatusCode, Json<WorkerCreated>) {
    let created = worker_service::add_worker(&state).await;
    tracing::info!("Added worker {}", created.worker_id);

    (StatusCode::CREATED, Json(created))
}

/// DELETE /workers/{worker_id}?reschedule=
/// Remove a worker, stopping its job
pub async fn delete_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<u32>,
    Query(query): Query<DeleteWorkerQuery>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting worker {} (reschedule: {})", worker_id, query.reschedule);

    worker_service::delete_worker(&state, worker_id, query.reschedule).await?;

    Ok(StatusCode::NO_CONTENT)
}
