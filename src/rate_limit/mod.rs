// Webhook rate limiting.
//
// Every provider delivery draws from one token bucket whose size is the
// runtime `rate_limit_webhook_per_minute`. The config is read on each check,
// so admin API changes apply to the next delivery.

use crate::config::RuntimeConfig;
use std::sync::Mutex;
use std::time::Instant;

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: u64, now: Instant) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    /// Refills at capacity/60 tokens per second, then takes one token if available.
    ///
    /// A lowered capacity caps the stored tokens immediately.
    fn take(&mut self, capacity: u64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * capacity as f64 / 60.0).min(capacity as f64);
        self.last_refill = now;

        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }
}

/// Limiter for `POST /api/webhooks/whatsapp`. In-memory; the bucket starts
/// full on the first limited delivery.
#[derive(Default)]
pub struct WebhookRateLimiter {
    bucket: Mutex<Option<TokenBucket>>,
}

impl WebhookRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when a delivery may proceed under `config`.
    ///
    /// A disabled limiter admits everything and leaves the bucket untouched.
    pub fn admit(&self, config: &RuntimeConfig) -> bool {
        if !config.rate_limit_enabled {
            return true;
        }
        self.admit_at(config.rate_limit_webhook_per_minute, Instant::now())
    }

    fn admit_at(&self, limit_per_minute: u64, now: Instant) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(|p| p.into_inner());
        bucket
            .get_or_insert_with(|| TokenBucket::full(limit_per_minute, now))
            .take(limit_per_minute, now)
    }
}
