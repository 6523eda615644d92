pub mod runtime;
pub use runtime::{new_runtime_config, RuntimeConfig, SharedRuntimeConfig};

use crate::capacity::QuotaPolicy;
use crate::ledger::AckRetryPolicy;
use anyhow::{anyhow, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::time::Duration;

/// Complete sendgate configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendgateConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Bearer token for /api/admin; admin API is closed when unset
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            admin_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "sendgate.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Provider webhook configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// HMAC-SHA512 secret shared with the provider. Unset disables verification.
    #[serde(default)]
    pub secret: Option<String>,
    /// Extra attempts for an ack whose record is not committed yet
    #[serde(default = "default_ack_retry_attempts")]
    pub ack_retry_attempts: u32,
    #[serde(default = "default_ack_retry_delay_ms")]
    pub ack_retry_delay_ms: u64,
}

fn default_ack_retry_attempts() -> u32 {
    3
}

fn default_ack_retry_delay_ms() -> u64 {
    250
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            ack_retry_attempts: default_ack_retry_attempts(),
            ack_retry_delay_ms: default_ack_retry_delay_ms(),
        }
    }
}

impl WebhookConfig {
    pub fn retry_policy(&self) -> AckRetryPolicy {
        AckRetryPolicy {
            attempts: self.ack_retry_attempts,
            delay: Duration::from_millis(self.ack_retry_delay_ms),
        }
    }
}

/// Daily quota configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CapacityConfig {
    /// IANA zone whose midnight starts the sending day
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_base_limit")]
    pub base_limit: u64,
    #[serde(default = "default_variation_bonus")]
    pub variation_bonus: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_base_limit() -> u64 {
    90
}

fn default_variation_bonus() -> u64 {
    10
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            base_limit: default_base_limit(),
            variation_bonus: default_variation_bonus(),
        }
    }
}

impl CapacityConfig {
    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Invalid capacity.timezone '{}': {}", self.timezone, e))
    }

    pub fn policy(&self) -> QuotaPolicy {
        QuotaPolicy {
            base: self.base_limit,
            per_variation: self.variation_bonus,
        }
    }
}

impl SendgateConfig {
    /// Applies `SENDGATE_*` environment overrides on top of file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Empty secrets and tokens mean "not configured", wherever they came from.
    fn clear_empty_credentials(&mut self) {
        self.webhook.secret = self.webhook.secret.take().filter(|s| !s.is_empty());
        self.server.admin_token = self.server.admin_token.take().filter(|t| !t.is_empty());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = var("SENDGATE_WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret).filter(|s| !s.is_empty());
        }
        if let Some(token) = var("SENDGATE_ADMIN_TOKEN") {
            self.server.admin_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(path) = var("SENDGATE_DB_PATH") {
            self.database.path = path;
        }
        if let Some(addr) = var("SENDGATE_BIND_ADDR") {
            self.server.bind_addr = addr;
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<SendgateConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let mut config: SendgateConfig = toml::from_str(&contents)?;
    config.clear_empty_credentials();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SendgateConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
        assert!(config.server.admin_token.is_none());
        assert_eq!(config.database.path, "sendgate.db");
        assert!(config.webhook.secret.is_none());
        assert_eq!(config.webhook.ack_retry_attempts, 3);
        assert_eq!(config.capacity.policy(), QuotaPolicy::default());
        assert_eq!(config.capacity.timezone().unwrap(), Tz::UTC);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:8080"
            admin_token = "root"

            [database]
            path = "/var/lib/sendgate/data.db"

            [webhook]
            secret = "whsec"
            ack_retry_attempts = 5
            ack_retry_delay_ms = 100

            [capacity]
            timezone = "America/Sao_Paulo"
            base_limit = 120
            variation_bonus = 15
        "#;

        let config: SendgateConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.server.admin_token.as_deref(), Some("root"));
        assert_eq!(config.database.path, "/var/lib/sendgate/data.db");
        assert_eq!(config.webhook.secret.as_deref(), Some("whsec"));

        let retry = config.webhook.retry_policy();
        assert_eq!(retry.attempts, 5);
        assert_eq!(retry.delay, Duration::from_millis(100));

        assert_eq!(config.capacity.timezone().unwrap(), Tz::America__Sao_Paulo);
        assert_eq!(config.capacity.policy().base, 120);
        assert_eq!(config.capacity.policy().per_variation, 15);
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [capacity]
            timezone = "Europe/Lisbon"
        "#;

        let config: SendgateConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.capacity.base_limit, 90);
        assert_eq!(config.webhook.ack_retry_delay_ms, 250);
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_invalid_timezone() {
        let capacity = CapacityConfig {
            timezone: "Mars/Olympus".to_string(),
            ..CapacityConfig::default()
        };
        assert!(capacity.timezone().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SENDGATE_WEBHOOK_SECRET", "from-env"),
            ("SENDGATE_ADMIN_TOKEN", ""),
            ("SENDGATE_DB_PATH", ":memory:"),
        ]
        .into_iter()
        .collect();

        let mut config = SendgateConfig::default();
        config.server.admin_token = Some("from-file".to_string());
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.webhook.secret.as_deref(), Some("from-env"));
        // Empty value clears the token
        assert!(config.server.admin_token.is_none());
        assert_eq!(config.database.path, ":memory:");
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[webhook]\nsecret = \"file-secret\"").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.webhook.secret.as_deref(), Some("file-secret"));
        assert!(load_config("/nonexistent/sendgate.toml").is_err());
    }

    #[test]
    fn test_empty_credentials_in_file_are_unset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nadmin_token = \"\"\n\n[webhook]\nsecret = \"\"").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert!(config.webhook.secret.is_none());
        assert!(config.server.admin_token.is_none());
    }
}
