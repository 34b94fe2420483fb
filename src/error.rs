use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Stable, machine-readable error codes. Clients match on these, not on messages.
pub mod error_code {
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
    pub const INTERNAL: &str = "INTERNAL";
}

/// First rule a submitted field broke.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: &'static str,
}

impl ValidationError {
    pub const fn new(field: &'static str, message: &'static str) -> Self {
        Self { field, message }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    /// HTTP 400.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// HTTP 401.
    #[error("{0}")]
    Unauthorized(String),

    /// HTTP 403.
    #[error("{0}")]
    Forbidden(String),

    /// HTTP 404.
    #[error("{0}")]
    NotFound(String),

    /// HTTP 409, tagged with the colliding field.
    #[error("{message}")]
    Conflict {
        field: &'static str,
        message: String,
    },

    /// HTTP 500. The message is user-facing; details go to the log only.
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
}

impl AppError {
    /// Logs `err` and returns a generic failure carrying `message`.
    pub fn internal(message: impl Into<String>, err: impl std::fmt::Display) -> Self {
        let message = message.into();
        error!(error = %err, "{}", message);
        AppError::Internal(message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        AppError::Unauthorized(message.into())
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => error_code::VALIDATION_FAILED,
            AppError::Unauthorized(_) => error_code::UNAUTHENTICATED,
            AppError::Forbidden(_) => error_code::PERMISSION_DENIED,
            AppError::NotFound(_) => error_code::NOT_FOUND,
            AppError::Conflict { .. } => error_code::ALREADY_EXISTS,
            AppError::Internal(_) => error_code::INTERNAL,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn field(&self) -> Option<&'static str> {
        match self {
            AppError::Validation(v) => Some(v.field),
            AppError::Conflict { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            code: self.error_code(),
            message: self.to_string(),
            field: self.field(),
        };
        (status, Json(body)).into_response()
    }
}
