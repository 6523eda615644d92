//! Per-device daily sending quota.
//!
//! The quota is derived on every request from the campaigns that currently
//! reference the device and the delivery records it sent since local
//! midnight. Nothing here is persisted.

use crate::campaign::{CampaignStore, ACTIVE_STATUSES};
use crate::device::DeviceStore;
use crate::ledger::DeliveryStore;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Base limit and per-variation bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub base: u64,
    pub per_variation: u64,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            base: 90,
            per_variation: 10,
        }
    }
}

/// Sending quota of one device for one local day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyQuota {
    pub device_id: String,
    pub date: NaiveDate,
    pub sent_today: u64,
    pub limit: u64,
    pub remaining: u64,
    pub exceeded: u64,
}

impl DailyQuota {
    fn new(device_id: &str, date: NaiveDate, sent_today: u64, limit: u64) -> Self {
        Self {
            device_id: device_id.to_string(),
            date,
            sent_today,
            limit,
            remaining: limit.saturating_sub(sent_today),
            exceeded: sent_today.saturating_sub(limit),
        }
    }
}

#[derive(Debug)]
pub enum CapacityError {
    NotFound(String),
    Store(anyhow::Error),
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityError::NotFound(id) => write!(f, "device '{}' not found", id),
            CapacityError::Store(e) => write!(f, "capacity lookup failed: {}", e),
        }
    }
}

impl std::error::Error for CapacityError {}

impl From<anyhow::Error> for CapacityError {
    fn from(e: anyhow::Error) -> Self {
        CapacityError::Store(e)
    }
}

pub struct CapacityCalculator {
    campaigns: Arc<dyn CampaignStore>,
    devices: Arc<dyn DeviceStore>,
    deliveries: Arc<dyn DeliveryStore>,
    policy: QuotaPolicy,
    tz: Tz,
}

impl CapacityCalculator {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        devices: Arc<dyn DeviceStore>,
        deliveries: Arc<dyn DeliveryStore>,
        policy: QuotaPolicy,
        tz: Tz,
    ) -> Self {
        Self {
            campaigns,
            devices,
            deliveries,
            policy,
            tz,
        }
    }

    /// Quota of `device_id` for the local day containing `now`.
    pub fn capacity(&self, device_id: &str, now: DateTime<Utc>) -> Result<DailyQuota, CapacityError> {
        let device = self
            .devices
            .get_device(device_id)?
            .ok_or_else(|| CapacityError::NotFound(device_id.to_string()))?;

        let (date, midnight) = local_midnight(now, self.tz);

        // A device that never connected has sent nothing
        if device.phone_number.is_none() {
            return Ok(DailyQuota::new(device_id, date, 0, self.policy.base));
        }

        let campaigns = self
            .campaigns
            .campaigns_referencing_device(device_id, &ACTIVE_STATUSES)?;
        if campaigns.is_empty() {
            return Ok(DailyQuota::new(device_id, date, 0, self.policy.base));
        }

        let bonus = campaigns
            .iter()
            .map(|c| c.variation_bonus(self.policy.per_variation))
            .max()
            .unwrap_or(0);
        let campaign_ids: Vec<String> = campaigns.into_iter().map(|c| c.id).collect();
        let sent_today = self
            .deliveries
            .count_sent_since(device_id, &campaign_ids, midnight)?;

        debug!(
            device_id = %device_id,
            campaigns = campaign_ids.len(),
            sent_today,
            since = %midnight,
            "Computed daily quota"
        );

        Ok(DailyQuota::new(
            device_id,
            date,
            sent_today,
            self.policy.base + bonus,
        ))
    }
}

/// Local date of `now` in `tz` and the UTC instant its day starts.
///
/// Where midnight falls in a DST gap the day starts at the first existing
/// local time after it.
fn local_midnight(now: DateTime<Utc>, tz: Tz) -> (NaiveDate, DateTime<Utc>) {
    let date = now.with_timezone(&tz).date_naive();
    let midnight = date.and_time(NaiveTime::MIN);
    let start = (0..=3)
        .find_map(|hours| {
            tz.from_local_datetime(&(midnight + Duration::hours(hours)))
                .earliest()
        })
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight));
    (date, start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{Campaign, CampaignStatus, SqliteCampaignStore};
    use crate::device::{Device, DeviceStatus, SqliteDeviceStore};
    use crate::ledger::{DeliveryStatus, OutgoingMessage, SqliteDeliveryStore};
    use crate::storage::Database;

    struct Fixture {
        campaigns: Arc<SqliteCampaignStore>,
        devices: Arc<SqliteDeviceStore>,
        deliveries: Arc<SqliteDeliveryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Database::in_memory().unwrap();
            Self {
                campaigns: Arc::new(SqliteCampaignStore::new(db.clone())),
                devices: Arc::new(SqliteDeviceStore::new(db.clone())),
                deliveries: Arc::new(SqliteDeliveryStore::new(db)),
            }
        }

        fn calculator(&self, tz: Tz) -> CapacityCalculator {
            CapacityCalculator::new(
                self.campaigns.clone(),
                self.devices.clone(),
                self.deliveries.clone(),
                QuotaPolicy::default(),
                tz,
            )
        }

        fn device(&self, id: &str, phone: Option<&str>) {
            self.devices
                .upsert(&Device {
                    id: id.to_string(),
                    phone_number: phone.map(str::to_string),
                    display_name: id.to_string(),
                    status: DeviceStatus::Connected,
                    session_name: format!("session-{}", id),
                })
                .unwrap();
        }

        fn campaign(&self, id: &str, status: CampaignStatus, devices: &[&str], variations: usize) {
            self.campaigns
                .insert(&Campaign {
                    id: id.to_string(),
                    name: id.to_string(),
                    status,
                    connection_id: None,
                    device_ids: devices.iter().map(|d| d.to_string()).collect(),
                    message_variations: (0..variations).map(|i| format!("Hello #{}", i)).collect(),
                    schedule: None,
                })
                .unwrap();
        }

        fn sent(&self, campaign: &str, device: &str, n: usize, status: DeliveryStatus, at: DateTime<Utc>) {
            for i in 0..n {
                self.deliveries
                    .create_if_absent(&OutgoingMessage {
                        campaign_id: campaign.to_string(),
                        provider_message_id: format!("{}-{}-{}-{}", campaign, device, at.timestamp(), i),
                        recipient: format!("55119{:08}", i),
                        device_id: device.to_string(),
                        sender_phone: Some("5511900000000".to_string()),
                        status,
                        at,
                    })
                    .unwrap();
            }
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_limit_uses_best_campaign_and_counts_today() {
        let f = Fixture::new();
        f.device("dev-d", Some("5511900000000"));
        f.campaign("camp-a", CampaignStatus::Running, &["dev-d"], 3);
        f.campaign("camp-b", CampaignStatus::Draft, &["dev-d"], 1);
        f.campaign("camp-old", CampaignStatus::Completed, &["dev-d"], 9);

        f.sent("camp-a", "dev-d", 30, DeliveryStatus::Sent, at(10, 9));
        f.sent("camp-b", "dev-d", 12, DeliveryStatus::Read, at(10, 11));
        // Not counted: yesterday, failed, finished campaign
        f.sent("camp-a", "dev-d", 5, DeliveryStatus::Sent, at(9, 20));
        f.sent("camp-a", "dev-d", 4, DeliveryStatus::Failed, at(10, 12));
        f.sent("camp-old", "dev-d", 7, DeliveryStatus::Sent, at(10, 8));

        let quota = f.calculator(Tz::UTC).capacity("dev-d", at(10, 15)).unwrap();
        assert_eq!(quota.limit, 110);
        assert_eq!(quota.sent_today, 42);
        assert_eq!(quota.remaining, 68);
        assert_eq!(quota.exceeded, 0);
        assert_eq!(quota.date, NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
    }

    #[test]
    fn test_exceeded_when_over_limit() {
        let f = Fixture::new();
        f.device("dev-d", Some("5511900000000"));
        f.campaign("camp-a", CampaignStatus::Running, &["dev-d"], 0);
        f.sent("camp-a", "dev-d", 95, DeliveryStatus::Delivered, at(10, 9));

        let quota = f.calculator(Tz::UTC).capacity("dev-d", at(10, 15)).unwrap();
        assert_eq!(quota.limit, 90);
        assert_eq!(quota.remaining, 0);
        assert_eq!(quota.exceeded, 5);
    }

    #[test]
    fn test_other_devices_do_not_count() {
        let f = Fixture::new();
        f.device("dev-d", Some("5511900000000"));
        f.device("dev-e", Some("5511911111111"));
        f.campaign("camp-a", CampaignStatus::Running, &["dev-d", "dev-e"], 1);
        f.sent("camp-a", "dev-e", 10, DeliveryStatus::Sent, at(10, 9));
        f.sent("camp-a", "dev-d", 2, DeliveryStatus::Sent, at(10, 9));

        let quota = f.calculator(Tz::UTC).capacity("dev-d", at(10, 15)).unwrap();
        assert_eq!(quota.sent_today, 2);
    }

    #[test]
    fn test_device_without_phone_or_campaigns_gets_base() {
        let f = Fixture::new();
        f.device("dev-new", None);
        f.device("dev-idle", Some("5511900000000"));
        f.campaign("camp-a", CampaignStatus::Running, &["dev-new"], 5);

        let calc = f.calculator(Tz::UTC);
        let fresh = calc.capacity("dev-new", at(10, 15)).unwrap();
        assert_eq!((fresh.sent_today, fresh.limit), (0, 90));

        let idle = calc.capacity("dev-idle", at(10, 15)).unwrap();
        assert_eq!((idle.sent_today, idle.limit, idle.remaining), (0, 90, 90));
    }

    #[test]
    fn test_unknown_device_is_not_found() {
        let f = Fixture::new();
        let err = f.calculator(Tz::UTC).capacity("ghost", at(10, 15)).unwrap_err();
        assert!(matches!(err, CapacityError::NotFound(id) if id == "ghost"));
    }

    #[test]
    fn test_day_boundary_follows_timezone() {
        let f = Fixture::new();
        f.device("dev-d", Some("5511900000000"));
        f.campaign("camp-a", CampaignStatus::Running, &["dev-d"], 1);
        // 01:00 in São Paulo on the 9th
        f.sent("camp-a", "dev-d", 3, DeliveryStatus::Sent, at(9, 4));

        // 23:00 on the 9th in São Paulo, already the 10th in UTC
        let now = at(10, 2);
        let local = f.calculator(Tz::America__Sao_Paulo).capacity("dev-d", now).unwrap();
        assert_eq!(local.sent_today, 3);
        assert_eq!(local.date, NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());

        let utc = f.calculator(Tz::UTC).capacity("dev-d", now).unwrap();
        assert_eq!(utc.sent_today, 0);
    }

    #[test]
    fn test_local_midnight_in_dst_gap() {
        // Clocks jumped from 00:00 to 01:00 on 2018-11-04 in São Paulo
        let now = Utc.with_ymd_and_hms(2018, 11, 4, 12, 0, 0).unwrap();
        let (date, start) = local_midnight(now, Tz::America__Sao_Paulo);
        assert_eq!(date, NaiveDate::from_ymd_opt(2018, 11, 4).unwrap());
        assert_eq!(start, Utc.with_ymd_and_hms(2018, 11, 4, 3, 0, 0).unwrap());
    }
}
