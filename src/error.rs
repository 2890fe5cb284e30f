//! Error types and HTTP error response handling.
//!
//! This module defines the storage error kind shared by every backend and the
//! application-wide error that is converted into HTTP responses.
//!
//! Business outcomes such as "already used", "expired" or "not owned" are NOT
//! errors. They are returned as typed results by the store and service layers
//! (see [`crate::store::ConsumeOutcome`] and [`crate::store::DeleteOutcome`]).

use std::time::Duration;

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Failure of a storage round trip.
///
/// Every variant is transient: the caller cannot know whether the operation
/// took effect and may retry. A storage error must never be reported to a
/// caller as "not found" or "already used".
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database rejected the query or could not be reached.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The operation did not complete within the configured deadline.
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The task running the operation panicked or was cancelled.
    #[error("Store task did not complete: {0}")]
    Aborted(#[from] tokio::task::JoinError),
}

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Storage Errors**: transient failures talking to the key store (retryable)
/// - **Authentication Errors**: invalid or missing API keys
/// - **Resource Errors**: requested key does not exist
/// - **Validation Errors**: invalid request data
/// - **Generation Errors**: identifier collisions exhausted the retry budget
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A key store or audit store operation failed or timed out.
    #[error("Storage unavailable: {0}")]
    Storage(#[from] StoreError),

    /// API key is missing, invalid, or inactive.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Requested key does not exist (never issued, revoked, or swept).
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Key not found")]
    KeyNotFound,

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    /// The String contains details about what was invalid.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// Every generated identifier in the retry budget was already taken.
    #[error("Could not allocate a unique key identifier after {0} attempts")]
    IdentifierCollision(usize),
}

impl AppError {
    /// Whether the caller may safely retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Storage(_))
    }
}

/// Malformed bodies (including unknown duration classes) answer in the
/// standard error shape rather than axum's plain-text rejection.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message",
///     "retryable": false
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `InvalidApiKey` → 401 Unauthorized
/// - `KeyNotFound` → 404 Not Found
/// - `InvalidRequest` → 400 Bad Request
/// - `Storage` → 503 Service Unavailable (details hidden from client)
/// - `IdentifierCollision` → 500 Internal Server Error
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retryable = self.is_retryable();

        let (status, code, message) = match self {
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                self.to_string(),
            ),
            AppError::KeyNotFound => (StatusCode::NOT_FOUND, "key_not_found", self.to_string()),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::Storage(ref err) => {
                tracing::error!(error = %err, "key store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage_unavailable",
                    "Storage is temporarily unavailable, retry the request".to_string(),
                )
            }
            AppError::IdentifierCollision(_) => {
                tracing::error!(error = %self, "identifier allocation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "retryable": retryable
            }
        }));

        (status, body).into_response()
    }
}
