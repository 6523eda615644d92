//! Sending devices (WhatsApp sessions bound to one phone number).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

mod store;

pub use store::SqliteDeviceStore;

/// Connection state of a device as last reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Connected,
    Disconnected,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Connected => "connected",
            DeviceStatus::Disconnected => "disconnected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connected" => Some(DeviceStatus::Connected),
            "disconnected" => Some(DeviceStatus::Disconnected),
            _ => None,
        }
    }

    /// Maps a provider session state onto a device status.
    ///
    /// Transitional states (STARTING, SCAN_QR_CODE, ...) return None and
    /// leave the stored status untouched.
    pub fn from_session_state(state: &str) -> Option<Self> {
        match state.to_ascii_uppercase().as_str() {
            "WORKING" => Some(DeviceStatus::Connected),
            "FAILED" | "STOPPED" => Some(DeviceStatus::Disconnected),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device (connection) owned by the tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    /// None until the session has connected at least once.
    pub phone_number: Option<String>,
    pub display_name: String,
    pub status: DeviceStatus,
    /// Provider session name; webhook envelopes are addressed by it.
    pub session_name: String,
}

/// Device persistence.
pub trait DeviceStore: Send + Sync {
    /// Inserts or replaces a device.
    fn upsert(&self, device: &Device) -> Result<()>;

    fn get_device(&self, id: &str) -> Result<Option<Device>>;

    fn find_by_session(&self, session_name: &str) -> Result<Option<Device>>;

    /// Returns false when no device has this id.
    fn update_status(&self, id: &str, status: DeviceStatus) -> Result<bool>;

    fn set_phone_number(&self, id: &str, phone_number: &str) -> Result<bool>;
}

/// Strips the provider's JID suffix (`5511999990000@c.us` → `5511999990000`).
pub fn phone_from_jid(jid: &str) -> &str {
    let number = jid.split('@').next().unwrap_or(jid);
    // Multi-device JIDs carry a ":<device>" suffix on the user part
    number.split(':').next().unwrap_or(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_mapping() {
        assert_eq!(
            DeviceStatus::from_session_state("WORKING"),
            Some(DeviceStatus::Connected)
        );
        assert_eq!(
            DeviceStatus::from_session_state("FAILED"),
            Some(DeviceStatus::Disconnected)
        );
        assert_eq!(
            DeviceStatus::from_session_state("stopped"),
            Some(DeviceStatus::Disconnected)
        );
        assert_eq!(DeviceStatus::from_session_state("SCAN_QR_CODE"), None);
        assert_eq!(DeviceStatus::from_session_state("STARTING"), None);
    }

    #[test]
    fn test_phone_from_jid() {
        assert_eq!(phone_from_jid("5511999990000@c.us"), "5511999990000");
        assert_eq!(phone_from_jid("5511999990000:12@s.whatsapp.net"), "5511999990000");
        assert_eq!(phone_from_jid("5511999990000"), "5511999990000");
    }
}
