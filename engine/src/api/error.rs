use axum::{http::StatusCode, Json};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::alarm::{ArmConflict, RefreshError};

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Helper to log error and return generic internal server error
pub fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    error!("Internal error: {}", err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::NOT_FOUND, message)
}

pub fn unprocessable(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::UNPROCESSABLE_ENTITY, message)
}

impl From<ArmConflict> for ErrorResponse {
    fn from(conflict: ArmConflict) -> Self {
        Self {
            error: conflict.to_string(),
        }
    }
}

pub fn arm_conflict(conflict: ArmConflict) -> ApiError {
    (StatusCode::CONFLICT, Json(conflict.into()))
}

pub fn refresh_error(err: RefreshError) -> ApiError {
    let status = match err {
        RefreshError::Inactive => StatusCode::NOT_FOUND,
        RefreshError::Halted(_) => StatusCode::CONFLICT,
        RefreshError::Throttled => StatusCode::TOO_MANY_REQUESTS,
    };
    error_response(status, err.to_string())
}
