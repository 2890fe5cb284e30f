//! Background removal of expired, never-consumed keys.
//!
//! The sweeper is an explicit task owned by process bootstrap:
//! [`ExpirySweeper::start`] spawns the periodic loop, [`ExpirySweeper::stop`]
//! ends it, and [`ExpirySweeper::run_once`] performs a sweep immediately so
//! tests never wait on a wall-clock interval.
//!
//! Sweeping is hygiene, not business history: it writes no audit entries,
//! only a summary log line. Consumed keys are never touched, and running
//! sweeps concurrently is safe because each deletion is conditional in the
//! store.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    clock::{Clock, SystemClock},
    error::StoreError,
    store::{KeyStore, StoreResult},
};

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

struct RunningSweep {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodically purges expired, unconsumed keys.
pub struct ExpirySweeper {
    keys: Arc<dyn KeyStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    store_timeout: Duration,
    running: Mutex<Option<RunningSweep>>,
}

impl ExpirySweeper {
    pub fn new(keys: Arc<dyn KeyStore>, interval: Duration) -> Self {
        Self {
            keys,
            clock: Arc::new(SystemClock),
            interval,
            store_timeout: Duration::from_secs(30),
            running: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Deadline for one purge statement.
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs a single sweep now and returns the purged identifiers.
    pub async fn run_once(&self) -> StoreResult<Vec<String>> {
        let now = self.clock.now();
        let purged = tokio::time::timeout(
            self.store_timeout,
            self.keys.purge_expired_unconsumed(now),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.store_timeout))??;

        if purged.is_empty() {
            tracing::debug!("expiry sweep found nothing to purge");
        } else {
            tracing::info!(purged = purged.len(), "expiry sweep removed unused expired keys");
        }
        Ok(purged)
    }

    /// Spawns the periodic sweep loop. Does nothing if it is already running.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock();
        if running.is_some() {
            tracing::warn!("expiry sweeper already running");
            return;
        }

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let sweeper = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweeper.interval);
            // The first tick fires immediately; consume it so the first sweep
            // happens one full interval after start.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("expiry sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = sweeper.run_once().await {
                            tracing::error!(error = %e, "expiry sweep failed");
                        }
                    }
                }
            }
        });

        tracing::info!(interval = ?self.interval, "expiry sweeper started");
        *running = Some(RunningSweep {
            cancel_token,
            handle,
        });
    }

    /// Stops the loop and waits for an in-flight sweep to finish.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(RunningSweep {
            cancel_token,
            handle,
        }) = running
        {
            cancel_token.cancel();
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "expiry sweeper task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}
