//! Access key HTTP handlers.
//!
//! This module implements the key-related API endpoints:
//! - POST /api/v1/keys - Issue a new key
//! - GET /api/v1/keys - List keys by filter
//! - GET /api/v1/keys/mine - List the requester's active keys
//! - POST /api/v1/keys/verify - Verify and consume a key
//! - GET /api/v1/keys/{id} - Key status
//! - POST /api/v1/keys/{id}/revoke - Revoke a key
//! - GET /api/v1/keys/{id}/audit - Audit trail of a key
//! - GET /api/v1/stats - Key counts

use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{
    app::AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        audit::AuditLogEntry,
        key::{
            IssueKeyRequest, Key, KeyStats, KeyStatusView, ListKeysQuery, ListMineQuery,
            RevokeKeyRequest, VerifyKeyRequest, VerifyResponse,
        },
    },
    services::key_service::RevokeOutcome,
};

/// Issue a new key.
///
/// # Request Body
///
/// ```json
/// {
///   "creator_id": "318204961234567890",
///   "creator_name": "Ada",
///   "creator_handle": "ada",
///   "duration": "7d",
///   "notes": "contractor onboarding"
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: the full key, including its identifier
/// - **Error (400)**: malformed body, missing fields or unknown duration class
/// - **Error (503)**: storage unavailable, safe to retry
pub async fn issue_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    payload: Result<Json<IssueKeyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;
    let key = state.keys.issue(request).await?;
    tracing::debug!(client = %auth.client_name, identifier = %key.identifier, "issued via API");

    Ok((StatusCode::CREATED, Json(key)))
}

/// List keys, newest first.
///
/// # Query Parameters
///
/// - `filter`: `all` (default), `active`, `consumed` or `expired`
/// - `limit`: page size, default 25, clamped to 1..=100
pub async fn list_keys(
    State(state): State<AppState>,
    query: Result<Query<ListKeysQuery>, QueryRejection>,
) -> Result<Json<Vec<Key>>, AppError> {
    let Query(query) = query?;
    let keys = state.keys.list_all(query.filter, query.limit).await?;
    Ok(Json(keys))
}

/// List the requester's own active keys, newest first.
///
/// # Query Parameters
///
/// - `requester_id`: stable id of the principal asking
pub async fn list_my_keys(
    State(state): State<AppState>,
    query: Result<Query<ListMineQuery>, QueryRejection>,
) -> Result<Json<Vec<Key>>, AppError> {
    let Query(query) = query?;
    let keys = state.keys.list_mine(&query.requester_id).await?;
    Ok(Json(keys))
}

/// Verify a key and consume it.
///
/// # Request Body
///
/// ```json
/// {
///   "identifier": "Q7ZK2M9D4XWB8RTN3HPC",
///   "redeemer_name": "build-runner-3",
///   "redeemer_external_id": "host-7781"
/// }
/// ```
///
/// # Response (200 OK)
///
/// Always 200 when the outcome is known; `reason` says which:
///
/// ```json
/// { "granted": false, "reason": "already_used" }
/// ```
///
/// A 503 means the outcome is unknown. Retrying is safe: if the first call
/// did consume the key, the retry answers `already_used`.
pub async fn verify_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    payload: Result<Json<VerifyKeyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, AppError> {
    let Json(request) = payload?;
    let response = state
        .keys
        .verify_and_consume(
            &request.identifier,
            &request.redeemer_name,
            &request.redeemer_external_id,
        )
        .await?;
    tracing::debug!(client = %auth.client_name, granted = response.granted, "verified via API");

    Ok(Json(response))
}

/// Current state and metadata of a key.
///
/// # Response
///
/// - **Success (200 OK)**: key fields plus `state` (`active`, `consumed`, `expired`)
/// - **Error (404)**: never issued, revoked, or swept
pub async fn get_key_status(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<KeyStatusView>, AppError> {
    let status = state
        .keys
        .check_status(&identifier)
        .await?
        .ok_or(AppError::KeyNotFound)?;

    Ok(Json(status))
}

/// Revoke a key on behalf of its creator.
///
/// # Request Body
///
/// ```json
/// { "requester_id": "318204961234567890" }
/// ```
///
/// # Response
///
/// - **204 No Content**: revoked
/// - **403 Forbidden**: requester is not the creator
/// - **404 Not Found**: no such key
/// - **409 Conflict**: the key was already used
pub async fn revoke_key(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    payload: Result<Json<RevokeKeyRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload?;
    let outcome = state.keys.revoke(&identifier, &request.requester_id).await?;

    let (status, code, message) = match outcome {
        RevokeOutcome::Revoked => return Ok(StatusCode::NO_CONTENT.into_response()),
        RevokeOutcome::NotOwned => (
            StatusCode::FORBIDDEN,
            "not_owner",
            "Only the creator of a key can revoke it",
        ),
        RevokeOutcome::NotFound => (StatusCode::NOT_FOUND, "key_not_found", "Key not found"),
        RevokeOutcome::AlreadyConsumed => (
            StatusCode::CONFLICT,
            "already_used",
            "Key has already been used and cannot be revoked",
        ),
    };

    let body = Json(json!({
        "error": {
            "code": code,
            "message": message,
            "retryable": false
        }
    }));
    Ok((status, body).into_response())
}

/// Audit trail of a key, oldest first.
///
/// Available after the key itself is revoked or swept.
pub async fn get_audit_trail(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    let entries = state.keys.audit_trail(&identifier).await?;
    Ok(Json(entries))
}

/// Key counts.
///
/// # Response (200 OK)
///
/// ```json
/// { "total": 120, "used": 80, "valid": 25, "expired": 15 }
/// ```
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<KeyStats>, AppError> {
    let stats = state.keys.stats().await?;
    Ok(Json(stats))
}
