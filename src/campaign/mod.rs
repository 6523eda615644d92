//! Campaigns and the device exclusivity rule.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

mod guard;
mod store;

pub use guard::{AdmissionError, DeviceConflict, DeviceLocks, ExclusivityGuard};
pub use store::SqliteCampaignStore;

/// Lifecycle state of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Failed,
}

/// Statuses under which a campaign still references its devices for
/// capacity purposes.
pub const ACTIVE_STATUSES: [CampaignStatus; 4] = [
    CampaignStatus::Running,
    CampaignStatus::Paused,
    CampaignStatus::Scheduled,
    CampaignStatus::Draft,
];

/// Statuses that claim a device exclusively.
pub const CLAIMING_STATUSES: [CampaignStatus; 1] = [CampaignStatus::Running];

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CampaignStatus::Draft),
            "scheduled" => Some(CampaignStatus::Scheduled),
            "running" => Some(CampaignStatus::Running),
            "paused" => Some(CampaignStatus::Paused),
            "completed" => Some(CampaignStatus::Completed),
            "failed" => Some(CampaignStatus::Failed),
            _ => None,
        }
    }

    /// Finished campaigns cannot be restarted.
    pub fn is_finished(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Failed)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A messaging campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub status: CampaignStatus,
    /// Primary device.
    pub connection_id: Option<String>,
    /// Additional devices for multi-device sending.
    #[serde(default)]
    pub device_ids: Vec<String>,
    /// Alternate message templates.
    #[serde(default)]
    pub message_variations: Vec<String>,
    /// Pause / active-hours settings, owned by the campaign UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Value>,
}

impl Campaign {
    /// Every device this campaign references: `{connection_id} ∪ device_ids`.
    pub fn device_set(&self) -> BTreeSet<String> {
        self.connection_id
            .iter()
            .chain(self.device_ids.iter())
            .filter(|id| !id.is_empty())
            .cloned()
            .collect()
    }

    /// Extra daily quota granted for each variation beyond the first.
    pub fn variation_bonus(&self, per_variation: u64) -> u64 {
        let count = self.message_variations.len() as u64;
        if count > 1 {
            (count - 1) * per_variation
        } else {
            0
        }
    }
}

/// Campaign persistence.
pub trait CampaignStore: Send + Sync {
    /// Persists a new campaign. Returns false when the id is already taken.
    fn insert(&self, campaign: &Campaign) -> Result<bool>;

    fn get(&self, id: &str) -> Result<Option<Campaign>>;

    /// Campaigns whose device set contains `device_id` and whose status is in `statuses`.
    fn campaigns_referencing_device(
        &self,
        device_id: &str,
        statuses: &[CampaignStatus],
    ) -> Result<Vec<Campaign>>;

    /// Returns false when no campaign has this id.
    fn update_campaign_status(&self, id: &str, status: CampaignStatus) -> Result<bool>;

    /// Deletes the campaign and its delivery records.
    fn delete(&self, id: &str) -> Result<bool>;
}
