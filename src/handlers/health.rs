//! Liveness and store reachability check.

use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: &'static str,

    /// `reachable` or `unreachable`
    pub store: &'static str,

    pub version: &'static str,

    pub timestamp: DateTime<Utc>,
}

/// Probes the key store within the normal store deadline.
///
/// Answers 200 when the store responds and 503 otherwise. The body has the
/// same shape either way so load balancers and humans read one format:
///
/// ```json
/// {
///   "status": "degraded",
///   "store": "unreachable",
///   "version": "0.1.0",
///   "timestamp": "2025-12-21T19:00:00Z"
/// }
/// ```
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status, store) = match state.keys.health().await {
        Ok(()) => (StatusCode::OK, "healthy", "reachable"),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", "unreachable")
        }
    };

    (
        code,
        Json(HealthResponse {
            status,
            store,
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now(),
        }),
    )
}
