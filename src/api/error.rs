//! API error types and response handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

use crate::error::PlayerError;

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,
    /// Error message
    pub message: String,
    /// Error code for programmatic handling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// API error type
#[derive(Debug)]
pub enum ApiError {
    InvalidInput(String),
    NotFound(String),
    NotReady,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::InvalidInput(msg) => write!(f, "{}", msg),
            ApiError::NotFound(resource) => write!(f, "{} not found", resource),
            ApiError::NotReady => write!(f, "Presence engine is not loaded"),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::NotReady => "NOT_READY",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
            code: Some(self.error_code().to_string()),
        };

        (status, Json(body)).into_response()
    }
}

impl From<PlayerError> for ApiError {
    fn from(err: PlayerError) -> Self {
        match err {
            PlayerError::NotFound(id) => ApiError::NotFound(format!("Player {}", id)),
            other => ApiError::InvalidInput(other.to_string()),
        }
    }
}
