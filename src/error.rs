//! Error types for the step rewriter

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, SyncError>;

/// Reconciliation error type
///
/// None of these are fatal to the process: a cycle that fails makes no
/// progress and is retried by the next scheduled invocation.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Change feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("Change cursor expired: {0}")]
    CursorExpired(String),

    #[error("Failed to write record {record_id}: {reason}")]
    WriteFailure { record_id: String, reason: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Preference store unavailable: {0}")]
    StateUnavailable(String),

    #[error("A sync cycle is already running")]
    CycleInProgress,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn write_failure(record_id: &str, reason: impl Into<String>) -> Self {
        SyncError::WriteFailure {
            record_id: record_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            SyncError::CycleInProgress => (
                StatusCode::CONFLICT,
                "cycle_in_progress",
                self.to_string(),
            ),
            SyncError::InvalidRecord(msg) | SyncError::InvalidSettings(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", msg.clone())
            }
            SyncError::FeedUnavailable(_) | SyncError::CursorExpired(_) => {
                tracing::error!("Feed error: {}", self);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "feed_unavailable",
                    "Change feed unavailable".to_string(),
                )
            }
            SyncError::WriteFailure { .. } => {
                tracing::error!("Write error: {}", self);
                (
                    StatusCode::BAD_GATEWAY,
                    "write_failure",
                    "Failed to write corrected record".to_string(),
                )
            }
            SyncError::StateUnavailable(_) | SyncError::Database(_) => {
                tracing::error!("Storage error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "Database error".to_string(),
                )
            }
            SyncError::Io(_) => {
                tracing::error!("Internal error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
