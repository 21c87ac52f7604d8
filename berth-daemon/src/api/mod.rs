//! API Module
//!
//! HTTP API layer for the daemon.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod schedule;
pub mod worker;

use axum::{
    Router,
    routing::{get, put},
};
use tower_http::trace::TraceLayer;

use crate::service::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Queue endpoints
        .route(
            "/queued_jobs",
            get(job::list_queued_jobs).post(job::submit_job),
        )
        .route(
            "/queued_jobs/{position}",
            get(job::get_queued_job)
                .patch(job::reposition_job)
                .delete(job::delete_queued_job),
        )
        // Running job endpoints
        .route("/running_jobs", get(job::list_running_jobs))
        .route(
            "/running_jobs/{job_id}",
            axum::routing::delete(job::stop_running_job),
        )
        .route("/running_jobs/{job_id}/logs", get(job::get_running_logs))
        .route(
            "/running_jobs/{job_id}/container_id",
            get(job::get_container_id),
        )
        // Finished job endpoints
        .route("/completed_jobs", get(job::list_completed_jobs))
        .route(
            "/completed_jobs/{job_id}",
            axum::routing::delete(job::delete_finished_job),
        )
        .route("/completed_jobs/{job_id}/logs", get(job::get_completed_logs))
        .route("/failed_jobs", get(job::list_failed_jobs))
        .route(
            "/failed_jobs/{job_id}",
            axum::routing::delete(job::delete_finished_job),
        )
        .route("/failed_jobs/{job_id}/logs", get(job::get_failed_logs))
        .route("/jobs/{job_id}", get(job::get_job))
        // Worker endpoints
        .route(
            "/workers",
            get(worker::list_workers).post(worker::add_worker),
        )
        .route(
            "/workers/{worker_id}",
            axum::routing::delete(worker::delete_worker),
        )
        // Scheduled job endpoints
        .route(
            "/scheduled_jobs",
            get(schedule::list_scheduled_jobs).post(schedule::create_scheduled_job),
        )
        .route(
            "/scheduled_jobs/{job_id}",
            get(schedule::get_scheduled_job)
                .patch(schedule::reschedule_job)
                .delete(schedule::delete_scheduled_job),
        )
        .route(
            "/scheduled_jobs/{job_id}/status",
            put(schedule::update_status),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
