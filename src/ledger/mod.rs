//! Delivery ledger: one record per campaign message, advanced by provider
//! webhook events.
//!
//! # Merge rule
//!
//! Status only moves forward along `queued < sent < delivered < read`.
//! `failed` can be reached from any non-terminal state (queued, sent,
//! delivered) and is terminal. An update that would move a record backwards
//! is a no-op, which makes duplicate and out-of-order webhook delivery safe.
//!
//! The store applies the rule inside a single conditional `UPDATE`, never as a
//! read-modify-write.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

mod store;

pub(crate) use store::delete_campaign_records;
pub use store::SqliteDeliveryStore;

/// Delivery state of a single campaign message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    /// Position in the forward order. `Failed` sits above `Read` so it is
    /// never overwritten.
    pub fn rank(&self) -> i64 {
        match self {
            DeliveryStatus::Queued => 0,
            DeliveryStatus::Sent => 1,
            DeliveryStatus::Delivered => 2,
            DeliveryStatus::Read => 3,
            DeliveryStatus::Failed => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(DeliveryStatus::Queued),
            "sent" => Some(DeliveryStatus::Sent),
            "delivered" => Some(DeliveryStatus::Delivered),
            "read" => Some(DeliveryStatus::Read),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }

    /// True for statuses that count against the daily quota.
    pub fn is_sent(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Sent | DeliveryStatus::Delivered | DeliveryStatus::Read
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Read | DeliveryStatus::Failed)
    }

    /// Whether a record in state `self` accepts `next`.
    ///
    /// Equal states are accepted so replays are harmless no-ops.
    pub fn accepts(&self, next: DeliveryStatus) -> bool {
        match (self, next) {
            (DeliveryStatus::Failed, DeliveryStatus::Failed) => true,
            (DeliveryStatus::Failed, _) => false,
            (current, DeliveryStatus::Failed) => !current.is_terminal(),
            (current, next) => current.rank() <= next.rank(),
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted campaign message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub id: String,
    pub campaign_id: String,
    /// Set once the provider has accepted the message.
    pub provider_message_id: Option<String>,
    pub recipient: String,
    /// Sending device, recorded when the message leaves.
    pub device_id: Option<String>,
    pub sender_phone: Option<String>,
    pub status: DeliveryStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// A recipient queued for a campaign.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub campaign_id: String,
    pub recipient: String,
    /// Planned sending device, if already known.
    pub device_id: Option<String>,
}

/// An outgoing message observed on the provider.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub campaign_id: String,
    pub provider_message_id: String,
    pub recipient: String,
    pub device_id: String,
    pub sender_phone: Option<String>,
    pub status: DeliveryStatus,
    pub at: DateTime<Utc>,
}

/// Result of [`DeliveryStore::create_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A queued record for the recipient was bound to the provider id.
    Bound,
    /// No queued record matched; a new one was inserted.
    Inserted,
    /// A record with this (campaign, provider id) already exists.
    AlreadyPresent,
}

/// Result of [`DeliveryStore::apply_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The status was merged into this many records.
    Applied(usize),
    /// Records exist but the merge rule rejected the update.
    Stale,
    /// No record carries this provider id (yet).
    Missing,
}

/// Delivery record persistence.
pub trait DeliveryStore: Send + Sync {
    /// Persists a queued record and returns its id.
    fn enqueue(&self, message: &QueuedMessage) -> Result<String>;

    /// Finds the campaign owning the oldest unbound queued record for
    /// `recipient` among active campaigns that reference `device_id`.
    fn find_pending_campaign(&self, device_id: &str, recipient: &str) -> Result<Option<String>>;

    /// Records an outgoing message, keyed by (campaign id, provider id).
    ///
    /// A provider id already recorded under any campaign is reported as
    /// [`CreateOutcome::AlreadyPresent`]. Safe under concurrent and
    /// duplicate delivery.
    fn create_if_absent(&self, message: &OutgoingMessage) -> Result<CreateOutcome>;

    /// Merges `status` into every record carrying `provider_message_id`.
    fn apply_status(
        &self,
        provider_message_id: &str,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<ApplyOutcome>;

    /// Records sent by `device_id` since `since`, restricted to `campaign_ids`.
    fn count_sent_since(
        &self,
        device_id: &str,
        campaign_ids: &[String],
        since: DateTime<Utc>,
    ) -> Result<u64>;

    fn get_by_provider_id(&self, provider_message_id: &str) -> Result<Vec<DeliveryRecord>>;

    fn list_for_campaign(&self, campaign_id: &str) -> Result<Vec<DeliveryRecord>>;

    fn delete_for_campaign(&self, campaign_id: &str) -> Result<usize>;
}

/// Bounded wait for records that have not been committed yet.
#[derive(Debug, Clone, Copy)]
pub struct AckRetryPolicy {
    /// Extra attempts after the first miss.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for AckRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(250),
        }
    }
}

/// Ack application with a bounded retry for missing records.
pub struct DeliveryLedger {
    store: Arc<dyn DeliveryStore>,
    retry: AckRetryPolicy,
}

impl DeliveryLedger {
    pub fn new(store: Arc<dyn DeliveryStore>, retry: AckRetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn DeliveryStore> {
        &self.store
    }

    /// Applies a provider ack to the record it refers to.
    ///
    /// The queued row may not be committed when the ack arrives, so a miss is
    /// retried `retry.attempts` times before the ack is dropped. A record is
    /// never created here.
    pub async fn apply_ack(
        &self,
        provider_message_id: &str,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        let mut attempt = 0;
        loop {
            let outcome = self.store.apply_status(provider_message_id, status, at)?;
            if outcome != ApplyOutcome::Missing {
                debug!(
                    provider_message_id = %provider_message_id,
                    status = %status,
                    outcome = ?outcome,
                    "Ack merged"
                );
                return Ok(outcome);
            }
            if attempt >= self.retry.attempts {
                warn!(
                    provider_message_id = %provider_message_id,
                    status = %status,
                    attempts = attempt + 1,
                    "Dropping ack for unknown message"
                );
                return Ok(ApplyOutcome::Missing);
            }
            attempt += 1;
            tokio::time::sleep(self.retry.delay).await;
        }
    }
}
