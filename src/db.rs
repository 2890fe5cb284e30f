//! Database connection pool and migration management.
//!
//! This module provides utilities for:
//! - Creating the PostgreSQL connection pool shared by the stores
//! - Running the embedded schema migrations at startup

use std::time::Duration;

use sqlx::{Pool, Postgres};

/// Type alias for PostgreSQL connection pool.
pub type DbPool = Pool<Postgres>;

/// Create a new PostgreSQL connection pool.
///
/// # Arguments
///
/// * `database_url` - PostgreSQL connection string
/// * `max_connections` - Upper bound on pooled connections
/// * `acquire_timeout` - How long a caller may wait for a free connection
///
/// Waiting for a connection counts against the caller's store deadline, so
/// `acquire_timeout` should not exceed the configured store timeout.
///
/// # Errors
///
/// Returns an error if:
/// - Database connection string is invalid
/// - Cannot connect to PostgreSQL server
/// - Database authentication fails
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}

/// Run database migrations from the `migrations/` directory.
///
/// Migrations are tracked in the `_sqlx_migrations` table, so each one runs
/// only once.
///
/// # Schema
///
/// - `api_keys`: HTTP API clients (hashed bearer tokens)
/// - `issued_identifiers`: every key identifier ever handed out
/// - `keys`: single-use access keys
/// - `audit_log`: append-only lifecycle history
///
/// # Errors
///
/// Returns an error if a migration cannot be applied.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    // The macro embeds ./migrations at compile time
    sqlx::migrate!("./migrations").run(pool).await
}
