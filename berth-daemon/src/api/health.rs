//! Health Check API Handler
//!
//! Health check endpoint reporting queue depth and GPU usage.

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::error::ApiResult;
use crate::error::SchedulerError;
use crate::service::AppState;

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let queued = state.scheduler.stores().queue.len().await.map_err(SchedulerError::from)?;
    let gpus = state.scheduler.gpus();
    let locked: Vec<String> = gpus
        .snapshot()
        .into_iter()
        .filter(|(_, locked)| *locked)
        .map(|(id, _)| id)
        .collect();

    Ok(Json(json!({
        "status": "ok",
        "queued_jobs": queued,
        "workers": state.workers.len().await,
        "scheduled_jobs": state.cron.len().await,
        "gpus": {
            "total": gpus.total(),
            "available": gpus.available(),
            "locked": locked,
        },
    })))
}
