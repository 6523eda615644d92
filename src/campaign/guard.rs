//! Device exclusivity guard.
//!
//! A device serves at most one running campaign. Admission checks every
//! device the campaign references for another running campaign and only then
//! commits the running status. Check and commit happen while holding a lock
//! per device, so two concurrent admissions touching the same device are
//! serialized and the second one sees the first one's commit.

use super::{Campaign, CampaignStatus, CampaignStore, CLAIMING_STATUSES};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

/// A device already claimed by another running campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConflict {
    pub device_id: String,
    pub conflicting_campaign_id: String,
    pub conflicting_campaign_name: String,
}

/// Why a campaign could not be admitted to running.
#[derive(Debug)]
pub enum AdmissionError {
    /// No campaign with this id.
    NotFound(String),
    /// A campaign with this id already exists.
    AlreadyExists(String),
    /// Completed and failed campaigns cannot be restarted.
    InvalidTransition { from: CampaignStatus },
    /// The campaign references no device.
    NoDevice,
    /// One or more devices are claimed by other running campaigns.
    /// Recoverable: the caller may save the campaign as a draft instead.
    Conflict(Vec<DeviceConflict>),
    Store(anyhow::Error),
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::NotFound(id) => write!(f, "campaign '{}' not found", id),
            AdmissionError::AlreadyExists(id) => write!(f, "campaign '{}' already exists", id),
            AdmissionError::InvalidTransition { from } => {
                write!(f, "cannot start a campaign that is {}", from)
            }
            AdmissionError::NoDevice => write!(f, "campaign has no device assigned"),
            AdmissionError::Conflict(conflicts) => {
                let devices: Vec<&str> = conflicts.iter().map(|c| c.device_id.as_str()).collect();
                write!(
                    f,
                    "device(s) already in use by a running campaign: {}",
                    devices.join(", ")
                )
            }
            AdmissionError::Store(e) => write!(f, "campaign store error: {}", e),
        }
    }
}

impl std::error::Error for AdmissionError {}

impl From<anyhow::Error> for AdmissionError {
    fn from(e: anyhow::Error) -> Self {
        AdmissionError::Store(e)
    }
}

/// Per-device async locks, created lazily.
#[derive(Default)]
pub struct DeviceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks every device in `device_ids`.
    ///
    /// Callers pass a sorted set so all admissions acquire locks in the same
    /// order.
    pub async fn acquire<'a, I>(&self, device_ids: I) -> Vec<OwnedMutexGuard<()>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut guards = Vec::new();
        for device_id in device_ids {
            // Clone the Arc out so the DashMap shard lock is released before awaiting
            let lock = self
                .locks
                .entry(device_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }
}

/// Admission control for running campaigns.
pub struct ExclusivityGuard {
    campaigns: Arc<dyn CampaignStore>,
    locks: Arc<DeviceLocks>,
}

impl ExclusivityGuard {
    pub fn new(campaigns: Arc<dyn CampaignStore>, locks: Arc<DeviceLocks>) -> Self {
        Self { campaigns, locks }
    }

    /// Lists devices of `campaign` claimed by some other running campaign.
    ///
    /// Advisory only: nothing is locked or committed.
    pub fn conflicts_for(&self, campaign: &Campaign) -> anyhow::Result<Vec<DeviceConflict>> {
        let mut conflicts = Vec::new();
        for device_id in campaign.device_set() {
            let running = self
                .campaigns
                .campaigns_referencing_device(&device_id, &CLAIMING_STATUSES)?;
            conflicts.extend(
                running
                    .into_iter()
                    .filter(|other| other.id != campaign.id)
                    .map(|other| DeviceConflict {
                        device_id: device_id.clone(),
                        conflicting_campaign_id: other.id,
                        conflicting_campaign_name: other.name,
                    }),
            );
        }
        Ok(conflicts)
    }

    /// Transitions an existing campaign to running.
    ///
    /// Starting a campaign that is already running is a no-op.
    pub async fn start(&self, campaign_id: &str) -> Result<Campaign, AdmissionError> {
        let campaign = self
            .campaigns
            .get(campaign_id)?
            .ok_or_else(|| AdmissionError::NotFound(campaign_id.to_string()))?;
        Self::validate_startable(&campaign)?;

        let devices = campaign.device_set();
        let _guards = self.locks.acquire(devices.iter()).await;

        // Re-read under the lock; the status may have moved while waiting
        let mut campaign = self
            .campaigns
            .get(campaign_id)?
            .ok_or_else(|| AdmissionError::NotFound(campaign_id.to_string()))?;
        Self::validate_startable(&campaign)?;
        if campaign.status == CampaignStatus::Running {
            return Ok(campaign);
        }

        self.reject_on_conflict(&campaign)?;

        if !self
            .campaigns
            .update_campaign_status(&campaign.id, CampaignStatus::Running)?
        {
            return Err(AdmissionError::NotFound(campaign.id));
        }
        campaign.status = CampaignStatus::Running;

        info!(
            campaign_id = %campaign.id,
            devices = ?devices,
            "Campaign admitted to running"
        );
        Ok(campaign)
    }

    /// Persists a new campaign that should run immediately.
    ///
    /// On conflict nothing is written; the caller can persist it as a draft
    /// instead.
    pub async fn create_running(&self, mut campaign: Campaign) -> Result<Campaign, AdmissionError> {
        campaign.status = CampaignStatus::Running;
        Self::validate_startable(&campaign)?;

        let devices = campaign.device_set();
        let _guards = self.locks.acquire(devices.iter()).await;

        self.reject_on_conflict(&campaign)?;
        if !self.campaigns.insert(&campaign)? {
            return Err(AdmissionError::AlreadyExists(campaign.id));
        }

        info!(
            campaign_id = %campaign.id,
            devices = ?devices,
            "Campaign created in running state"
        );
        Ok(campaign)
    }

    fn validate_startable(campaign: &Campaign) -> Result<(), AdmissionError> {
        if campaign.status.is_finished() {
            return Err(AdmissionError::InvalidTransition {
                from: campaign.status,
            });
        }
        if campaign.device_set().is_empty() {
            return Err(AdmissionError::NoDevice);
        }
        Ok(())
    }

    fn reject_on_conflict(&self, campaign: &Campaign) -> Result<(), AdmissionError> {
        let conflicts = self.conflicts_for(campaign)?;
        if conflicts.is_empty() {
            return Ok(());
        }
        warn!(
            campaign_id = %campaign.id,
            conflicts = conflicts.len(),
            "Campaign admission rejected: device already claimed"
        );
        Err(AdmissionError::Conflict(conflicts))
    }
}
