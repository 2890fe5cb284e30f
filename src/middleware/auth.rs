//! API key authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the bearer token from the Authorization header
//! 2. Hash it and look up an active API client with that hash
//! 3. Inject authentication context into the request
//! 4. Reject unauthorized requests with HTTP 401

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{
    app::AppState,
    error::{AppError, StoreError},
    models::api_key::hash_bearer_token,
};

/// Authentication context attached to authenticated requests.
///
/// Identifies the integration calling the API (the chat bot or a verifying
/// party), not the end user on whose behalf it acts.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// ID of the authenticated API client
    pub client_id: Uuid,

    /// Name of the integration making the request
    pub client_name: String,
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <token>` header from request
/// 2. Hash the token using SHA-256
/// 3. Look up an active client with that hash
/// 4. If found: inject `AuthContext` into request, call next handler
/// 5. If not found: return 401 Unauthorized error
///
/// The lookup runs under the same store deadline as key operations. A
/// storage failure or timeout is reported as 503, not 401, so callers can
/// tell a bad token from an outage.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidApiKey)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::InvalidApiKey)?;

    let deadline = state.keys.store_timeout();
    let client = tokio::time::timeout(
        deadline,
        state.clients.find_active_client(&hash_bearer_token(token)),
    )
    .await
    .map_err(|_| {
        tracing::warn!(timeout = ?deadline, "API client lookup timed out");
        StoreError::Timeout(deadline)
    })??
    .ok_or(AppError::InvalidApiKey)?;

    // Route handlers can now extract this using Extension<AuthContext>
    request.extensions_mut().insert(AuthContext {
        client_id: client.id,
        client_name: client.client_name,
    });

    Ok(next.run(request).await)
}
