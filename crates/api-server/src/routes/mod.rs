//! Route handlers

pub mod execution;
pub mod health;
pub mod task;

use axum::{http::StatusCode, Json};
use serde::Serialize;
use tracing::error;

use job_runner::ExecutorError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type RouteError = (StatusCode, Json<ErrorResponse>);

/// Map a service error onto an HTTP status and error body
pub fn route_error(err: ExecutorError) -> RouteError {
    let status = match &err {
        ExecutorError::TaskNotFound { .. } | ExecutorError::ExecutionNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        ExecutorError::Conflict { .. } => StatusCode::CONFLICT,
        ExecutorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => {
            error!("Request failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

pub fn bad_request(error: impl Into<String>) -> RouteError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}
