use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Limits editable at runtime through PUT /api/admin/config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub rate_limit_enabled: bool,
    pub rate_limit_webhook_per_minute: u64,
    pub body_size_limit_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rate_limit_enabled: true,
            rate_limit_webhook_per_minute: 6_000,
            body_size_limit_bytes: 1_048_576, // 1 MiB
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl RuntimeConfig {
    /// Build from `SENDGATE_*` env vars; unset or unparsable values keep the default.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(enabled) = env_parse("SENDGATE_RATE_LIMIT_ENABLED") {
            cfg.rate_limit_enabled = enabled;
        }
        if let Some(limit) = env_parse("SENDGATE_RATE_LIMIT_WEBHOOK_PER_MINUTE") {
            cfg.rate_limit_webhook_per_minute = limit;
        }
        if let Some(bytes) = env_parse("SENDGATE_BODY_SIZE_LIMIT_BYTES") {
            cfg.body_size_limit_bytes = bytes;
        }
        cfg
    }
}

pub type SharedRuntimeConfig = Arc<RwLock<RuntimeConfig>>;

pub fn new_runtime_config() -> SharedRuntimeConfig {
    Arc::new(RwLock::new(RuntimeConfig::from_env()))
}
