//! Service Errors

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use crate::db::RepositoryError;
use crate::ingest::tee::TeeError;
use crate::media::convert::ConvertError;
use crate::storage::StorageError;

/// Errors returned by [`FileService`](crate::service::FileService).
#[derive(Debug, Error)]
pub enum FileError {
    /// The request was rejected before any I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No live file with this id.
    #[error("File not found")]
    NotFound,

    /// Image conversion is not configured.
    #[error("Image conversion is not available")]
    Unavailable,

    /// The converter could not process the input.
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// The converter ran out of time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for FileError {
    fn from(e: sqlx::Error) -> Self {
        Self::Internal(format!("database: {e}"))
    }
}

impl From<RepositoryError> for FileError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Database(e) => e.into(),
            RepositoryError::Duplicate(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<StorageError> for FileError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(_) => Self::NotFound,
            e => Self::Internal(format!("storage: {e}")),
        }
    }
}

impl From<ConvertError> for FileError {
    fn from(e: ConvertError) -> Self {
        match e {
            ConvertError::Unavailable => Self::Unavailable,
            ConvertError::InvalidDimensions { .. } => Self::Validation(e.to_string()),
            ConvertError::UnsupportedInput { .. } => Self::UnsupportedInput(e.to_string()),
            ConvertError::Timeout(after) => Self::Timeout(after),
            ConvertError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<TeeError> for FileError {
    fn from(e: TeeError) -> Self {
        match e {
            TeeError::LimitExceeded { .. } => Self::Validation(e.to_string()),
            TeeError::Read(_) | TeeError::ConsumerClosed(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for FileError {
    fn from(e: validator::ValidationErrors) -> Self {
        Self::Validation(e.to_string())
    }
}

impl IntoResponse for FileError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                self.to_string(),
            ),
            Self::NotFound => (StatusCode::NOT_FOUND, "FILE_NOT_FOUND", self.to_string()),
            Self::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CONVERTER_UNAVAILABLE",
                self.to_string(),
            ),
            Self::UnsupportedInput(_) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_INPUT",
                self.to_string(),
            ),
            Self::Timeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "CONVERSION_TIMEOUT",
                self.to_string(),
            ),
            Self::Internal(detail) => {
                error!(error = %detail, "Internal file service error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(serde_json::json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}
