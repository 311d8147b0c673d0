//! Service-level error handling for the connection broker.
//!
//! Routine connect failures never show up here: they are reported inside a
//! `ConnectionResult` with status `Error`. This module covers the
//! infrastructural tier that the transport layer maps to failure responses.
//!
//! # HTTP Status Codes
//!
//! | Code | Status | Usage |
//! |------|--------|-------|
//! | `INVALID_REQUEST` | 400 | Malformed request (empty connection code, ...) |
//! | `SYSTEM_NOT_FOUND` | 404 | Unknown system code |
//! | `CONNECTION_NOT_FOUND` | 404 | Unknown user or connection code |
//! | `PUBLISH_FAILED` | 500 | Change notification could not be published |
//! | `ADAPTER_ERROR` | 502 | Adapter failure on a dispatched query |

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::ports::PublishError;
use crate::domain::adapter::AdapterError;
use crate::domain::connection::RegistryMiss;

/// Error codes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid request format or missing fields.
    InvalidRequest,
    /// The system code is not in the adapter catalog.
    SystemNotFound,
    /// The user or the connection code is unknown.
    ConnectionNotFound,
    /// A change notification could not be published.
    PublishFailed,
    /// The adapter failed a dispatched call.
    AdapterError,
}

impl ErrorCode {
    /// Get the HTTP status for this error.
    #[must_use]
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::SystemNotFound | Self::ConnectionNotFound => StatusCode::NOT_FOUND,
            Self::PublishFailed => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AdapterError => StatusCode::BAD_GATEWAY,
        }
    }

    /// Get the error reason string.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::SystemNotFound => "SYSTEM_NOT_FOUND",
            Self::ConnectionNotFound => "CONNECTION_NOT_FOUND",
            Self::PublishFailed => "PUBLISH_FAILED",
            Self::AdapterError => "ADAPTER_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// Errors returned by `ConnectionService` operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The request is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The system code is not registered.
    #[error("System not found: {0}")]
    SystemNotFound(String),

    /// The user or connection is unknown.
    #[error("{0}")]
    NotFound(String),

    /// The operation could not be completed on the broker side.
    #[error("Server error: {0}")]
    ServerError(String),

    /// A dispatched adapter call failed; returned unmodified.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl ServiceError {
    /// Get the error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::SystemNotFound(_) => ErrorCode::SystemNotFound,
            Self::NotFound(_) => ErrorCode::ConnectionNotFound,
            Self::ServerError(_) => ErrorCode::PublishFailed,
            Self::Adapter(_) => ErrorCode::AdapterError,
        }
    }

    /// Check if this is one of the not-found errors.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::SystemNotFound(_) | Self::NotFound(_))
    }

    /// Convert to an HTTP-compatible error response.
    #[must_use]
    pub fn to_http_response(&self) -> HttpErrorResponse {
        let code = self.code();
        HttpErrorResponse {
            code: code.reason().to_string(),
            message: self.to_string(),
            http_status: code.http_status().as_u16(),
        }
    }
}

impl From<RegistryMiss> for ServiceError {
    fn from(miss: RegistryMiss) -> Self {
        Self::NotFound(miss.to_string())
    }
}

impl From<PublishError> for ServiceError {
    fn from(error: PublishError) -> Self {
        Self::ServerError(error.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.code().http_status();
        (status, axum::Json(self.to_http_response())).into_response()
    }
}

/// HTTP-compatible error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    /// Error code string.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// HTTP status code.
    pub http_status: u16,
}
