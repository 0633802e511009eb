//! Error handling utilities for route handlers

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::services::publisher::PublishError;

/// Extension trait for logging errors and converting to an [`ApiError`]
pub trait LogErr<T> {
    /// Log error with context and return INTERNAL_SERVER_ERROR
    fn log_500(self, context: &str) -> Result<T, ApiError>;

    /// Log error with context and return a custom StatusCode
    fn log_status(self, context: &str, status: StatusCode) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_500(self, context: &str) -> Result<T, ApiError> {
        self.log_status(context, StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn log_status(self, context: &str, status: StatusCode) -> Result<T, ApiError> {
        self.map_err(|e| {
            tracing::error!("{}: {}", context, e);
            ApiError::new(status, context)
        })
    }
}

/// JSON error body: `{ "success": false, "error": "..." }`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn storage_not_configured() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage is not configured")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<PublishError> for ApiError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::Validation(message) => ApiError::bad_request(message),
            PublishError::AccountNotFound(_) => ApiError::new(StatusCode::NOT_FOUND, e.to_string()),
            PublishError::Infrastructure(inner) => {
                tracing::error!("publish lookup failed: {}", inner);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
            }
        }
    }
}
