//! Router construction and shared handler state.

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{handlers, middleware, services::key_service::KeyService, store::ApiClientStore};

/// State shared with every handler via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    pub keys: Arc<KeyService>,
    pub clients: Arc<dyn ApiClientStore>,
}

impl AppState {
    pub fn new(keys: Arc<KeyService>, clients: Arc<dyn ApiClientStore>) -> Self {
        Self { keys, clients }
    }
}

/// Builds the HTTP router.
///
/// # Routes
///
/// Public:
/// - `GET /health`
///
/// Authenticated (`Authorization: Bearer <api key>`):
/// - `POST /api/v1/keys` - issue
/// - `GET /api/v1/keys` - list all (filter, limit)
/// - `GET /api/v1/keys/mine` - requester's active keys
/// - `POST /api/v1/keys/verify` - verify and consume
/// - `GET /api/v1/keys/{id}` - status
/// - `POST /api/v1/keys/{id}/revoke` - revoke
/// - `GET /api/v1/keys/{id}/audit` - audit trail
/// - `GET /api/v1/stats` - counts
pub fn router(state: AppState) -> Router {
    let authenticated_routes = Router::new()
        .route(
            "/api/v1/keys",
            post(handlers::keys::issue_key).get(handlers::keys::list_keys),
        )
        .route("/api/v1/keys/mine", get(handlers::keys::list_my_keys))
        .route("/api/v1/keys/verify", post(handlers::keys::verify_key))
        .route("/api/v1/keys/{id}", get(handlers::keys::get_key_status))
        .route("/api/v1/keys/{id}/revoke", post(handlers::keys::revoke_key))
        .route("/api/v1/keys/{id}/audit", get(handlers::keys::get_audit_trail))
        .route("/api/v1/stats", get(handlers::keys::get_stats))
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
