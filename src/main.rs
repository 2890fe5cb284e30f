//! Access Key Service - Main Application Entry Point
//!
//! REST API server that issues single-use, time-bounded access keys and lets
//! verifying parties redeem each key exactly once.
//!
//! # Startup Flow
//!
//! 1. Load and validate configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Wire stores, notifier and key service
//! 5. Start the expiry sweeper
//! 6. Build HTTP router and serve until Ctrl-C, then stop the sweeper

use std::sync::Arc;

use access_key_service::{
    app::{self, AppState},
    config::Config,
    db,
    services::{
        key_service::KeyService,
        notifier::{ConsumptionNotifier, NoopNotifier, WebhookNotifier},
        sweeper::ExpirySweeper,
    },
    store::PgStore,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    config.validate()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(
        &config.database_url,
        config.database_max_connections,
        config.store_timeout(),
    )
    .await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let store = Arc::new(PgStore::new(pool));

    let notifier: Arc<dyn ConsumptionNotifier> = match config.webhook_target()? {
        Some(target) => {
            tracing::info!(url = %target.url, "Consumption webhooks enabled");
            Arc::new(WebhookNotifier::new(&target.url, &target.secret)?)
        }
        None => Arc::new(NoopNotifier),
    };

    let keys = Arc::new(
        KeyService::new(store.clone(), store.clone())
            .with_notifier(notifier)
            .with_store_timeout(config.store_timeout()),
    );

    let sweeper = Arc::new(ExpirySweeper::new(store.clone(), config.sweep_interval()));
    sweeper.start();

    let app = app::router(AppState::new(keys, store));

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.stop().await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
