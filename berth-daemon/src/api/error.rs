//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::SchedulerError;
use crate::repository::StoreError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Gone(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Gone(msg) => (StatusCode::GONE, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        let message = err.to_string();
        match err {
            SchedulerError::WorkerNotFound(_)
            | SchedulerError::JobNotFound(_)
            | SchedulerError::CronJobNotFound(_)
            | SchedulerError::Store(StoreError::OutOfRange { .. })
            | SchedulerError::Store(StoreError::Empty) => ApiError::NotFound(message),

            SchedulerError::InvalidSchedule(_)
            | SchedulerError::CapacityExceeded(_)
            | SchedulerError::InvalidSort(_)
            | SchedulerError::InvalidRequest(_) => ApiError::BadRequest(message),

            SchedulerError::DuplicateJob(_)
            | SchedulerError::AlreadyScheduled(_)
            | SchedulerError::MissingBundle(_) => ApiError::Conflict(message),

            SchedulerError::ExpiredTrigger(_) => ApiError::Gone(message),

            SchedulerError::Store(_) | SchedulerError::Backend(_) | SchedulerError::Io(_) => {
                ApiError::InternalError(message)
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::trigger::TriggerError;

    fn status_of(err: SchedulerError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(status_of(SchedulerError::WorkerNotFound(3)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(SchedulerError::Store(StoreError::OutOfRange { position: 4, len: 1 })),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SchedulerError::InvalidSchedule(TriggerError::NeverFires)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(SchedulerError::CapacityExceeded(10)), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(SchedulerError::DuplicateJob("a".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SchedulerError::ExpiredTrigger("a".to_string())),
            StatusCode::GONE
        );
        assert_eq!(
            status_of(SchedulerError::Io(std::io::Error::other("disk"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
