//! Maps domain errors to HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use zipline_core::error::{AppError, ErrorKind};
use zipline_service::{HeaderError, SessionError, UploadError};

/// Standard API error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

/// Body of a rejected upload header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderErrorResponse {
    /// What was wrong.
    pub error: String,
    /// The offending header.
    pub header: String,
}

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    /// A malformed upload header.
    Header(HeaderError),
    /// Any other failure.
    App(AppError),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self::App(err)
    }
}

impl From<HeaderError> for ApiError {
    fn from(err: HeaderError) -> Self {
        Self::Header(err)
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::App(err.into())
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Header(e) => Self::Header(e),
            UploadError::App(e) => Self::App(e),
        }
    }
}

/// HTTP status and code string for an error kind.
pub fn status_of(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::Validation => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        ErrorKind::Authentication => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        ErrorKind::Authorization => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        ErrorKind::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
        ErrorKind::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
        ErrorKind::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        ErrorKind::ExternalService => (StatusCode::BAD_GATEWAY, "EXTERNAL_SERVICE_ERROR"),
        ErrorKind::Internal
        | ErrorKind::Database
        | ErrorKind::Storage
        | ErrorKind::Configuration
        | ErrorKind::Serialization => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Header(err) => {
                let body = HeaderErrorResponse {
                    error: err.message,
                    header: err.header.to_string(),
                };
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            Self::App(err) => {
                let (status, error_code) = status_of(err.kind);
                // Internal details stay in the log.
                let message = if status.is_server_error()
                    && status != StatusCode::SERVICE_UNAVAILABLE
                {
                    tracing::error!(kind = %err.kind, error = %err.message, "Internal server error");
                    "Internal server error".to_string()
                } else {
                    err.message
                };

                let body = ApiErrorResponse {
                    error: error_code.to_string(),
                    message,
                };
                (status, Json(body)).into_response()
            }
        }
    }
}
