//! Error types for the web surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;
use tugboat_scheduler::SchedulerError;

/// Errors that can occur serving the HTTP surface.
#[derive(Debug, Error)]
pub enum WebError {
    /// Scheduler error, mapped onto a status code per variant.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// IO error reading logs.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            // NotFound must map to 404: remote callers treat it as
            // permanent and stop retrying.
            WebError::Scheduler(SchedulerError::NotFound(_)) => StatusCode::NOT_FOUND,
            WebError::Scheduler(SchedulerError::AlreadyRunning(_)) => StatusCode::CONFLICT,
            WebError::Scheduler(SchedulerError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            WebError::Scheduler(SchedulerError::ExecutionFailed(_)) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
