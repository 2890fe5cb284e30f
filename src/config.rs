//! Application configuration management.
//!
//! This module loads configuration from environment variables using the
//! `envy` crate, after `dotenvy` has loaded an optional `.env` file.

use std::time::Duration;

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `DATABASE_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `SWEEP_INTERVAL_SECS` (optional): expiry sweep period, defaults to 300
/// - `STORE_TIMEOUT_MS` (optional): deadline for each store call, defaults to 5000
/// - `NOTIFY_WEBHOOK_URL` / `NOTIFY_WEBHOOK_SECRET` (optional): where to
///   announce consumed keys; set both or neither
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    #[serde(default)]
    pub notify_webhook_url: Option<String>,

    #[serde(default)]
    pub notify_webhook_secret: Option<String>,
}

fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_store_timeout_ms() -> u64 {
    5000
}

/// Webhook target for consumption notices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub url: String,
    pub secret: String,
}

/// Configuration that deserialized but is not usable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("NOTIFY_WEBHOOK_URL and NOTIFY_WEBHOOK_SECRET must be set together")]
    IncompleteWebhook,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are converted automatically: database_url -> DATABASE_URL
        envy::from_env::<Config>()
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Zero("SWEEP_INTERVAL_SECS"));
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Zero("STORE_TIMEOUT_MS"));
        }
        if self.database_max_connections == 0 {
            return Err(ConfigError::Zero("DATABASE_MAX_CONNECTIONS"));
        }
        self.webhook_target().map(|_| ())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// The webhook target, if notification is configured.
    pub fn webhook_target(&self) -> Result<Option<WebhookTarget>, ConfigError> {
        match (&self.notify_webhook_url, &self.notify_webhook_secret) {
            (Some(url), Some(secret)) => Ok(Some(WebhookTarget {
                url: url.clone(),
                secret: secret.clone(),
            })),
            (None, None) => Ok(None),
            _ => Err(ConfigError::IncompleteWebhook),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        envy::from_iter(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string())),
        )
        .expect("config deserializes")
    }

    #[test]
    fn defaults_apply() {
        let config = from_pairs(&[("DATABASE_URL", "postgres://localhost/keys")]);
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.store_timeout(), Duration::from_millis(5000));
        assert!(config.validate().is_ok());
        assert_eq!(config.webhook_target().expect("valid"), None);
    }

    #[test]
    fn webhook_requires_url_and_secret() {
        let config = from_pairs(&[
            ("DATABASE_URL", "postgres://localhost/keys"),
            ("NOTIFY_WEBHOOK_URL", "https://bot.example.com/hooks/keys"),
        ]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncompleteWebhook)
        ));
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        let config = from_pairs(&[
            ("DATABASE_URL", "postgres://localhost/keys"),
            ("SWEEP_INTERVAL_SECS", "0"),
        ]);
        assert!(matches!(config.validate(), Err(ConfigError::Zero(_))));
    }
}
