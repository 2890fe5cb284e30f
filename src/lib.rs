//! Single-use access key service.
//!
//! Issues time-bounded keys that a verifying party can redeem exactly once.
//! Redemption is race-safe: among any number of concurrent verify calls for
//! one key, at most one is granted. Every issuance, redemption and
//! revocation is recorded in an append-only audit log, and a background
//! sweeper removes keys that expired without being used.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: API key with SHA-256 hashing
//! - **Format**: JSON requests/responses
//!
//! # Layout
//!
//! - [`store`]: storage traits with PostgreSQL and in-memory backends
//! - [`services`]: key lifecycle, identifier generation, sweeping, notification
//! - [`handlers`] / [`middleware`] / [`app`]: the HTTP front door

pub mod app;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
