//! SQLite-backed device store.

use super::{Device, DeviceStatus, DeviceStore};
use crate::storage::Database;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

pub struct SqliteDeviceStore {
    db: Database,
}

impl SqliteDeviceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    let status: String = row.get(3)?;
    Ok(Device {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        display_name: row.get(2)?,
        // Unknown values only appear if the table was edited by hand
        status: DeviceStatus::parse(&status).unwrap_or(DeviceStatus::Disconnected),
        session_name: row.get(4)?,
    })
}

const SELECT_DEVICE: &str =
    "SELECT id, phone_number, display_name, status, session_name FROM devices";

impl DeviceStore for SqliteDeviceStore {
    fn upsert(&self, device: &Device) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            r#"
            INSERT INTO devices (id, phone_number, display_name, status, session_name, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                phone_number = excluded.phone_number,
                display_name = excluded.display_name,
                status = excluded.status,
                session_name = excluded.session_name,
                updated_at = excluded.updated_at
            "#,
            params![
                device.id,
                device.phone_number,
                device.display_name,
                device.status.as_str(),
                device.session_name,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to upsert device")?;
        Ok(())
    }

    fn get_device(&self, id: &str) -> Result<Option<Device>> {
        let conn = self.db.conn()?;
        conn.query_row(
            &format!("{} WHERE id = ?1", SELECT_DEVICE),
            params![id],
            device_from_row,
        )
        .optional()
        .context("Failed to load device")
    }

    fn find_by_session(&self, session_name: &str) -> Result<Option<Device>> {
        let conn = self.db.conn()?;
        conn.query_row(
            &format!("{} WHERE session_name = ?1", SELECT_DEVICE),
            params![session_name],
            device_from_row,
        )
        .optional()
        .context("Failed to look up device by session")
    }

    fn update_status(&self, id: &str, status: DeviceStatus) -> Result<bool> {
        let conn = self.db.conn()?;
        let rows = conn
            .execute(
                "UPDATE devices SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .context("Failed to update device status")?;
        Ok(rows > 0)
    }

    fn set_phone_number(&self, id: &str, phone_number: &str) -> Result<bool> {
        let conn = self.db.conn()?;
        let rows = conn
            .execute(
                "UPDATE devices SET phone_number = ?1, updated_at = ?2 WHERE id = ?3",
                params![phone_number, Utc::now().to_rfc3339(), id],
            )
            .context("Failed to update device phone number")?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_store() -> SqliteDeviceStore {
        SqliteDeviceStore::new(Database::in_memory().expect("in-memory db failed"))
    }

    fn sample_device(id: &str, session: &str) -> Device {
        Device {
            id: id.to_string(),
            phone_number: None,
            display_name: "Sales line".to_string(),
            status: DeviceStatus::Disconnected,
            session_name: session.to_string(),
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let store = in_memory_store();
        store.upsert(&sample_device("dev-1", "sales")).unwrap();

        let loaded = store.get_device("dev-1").unwrap().expect("device missing");
        assert_eq!(loaded.session_name, "sales");
        assert_eq!(loaded.status, DeviceStatus::Disconnected);
        assert!(loaded.phone_number.is_none());
    }

    #[test]
    fn test_get_missing_device() {
        let store = in_memory_store();
        assert!(store.get_device("nope").unwrap().is_none());
    }

    #[test]
    fn test_find_by_session() {
        let store = in_memory_store();
        store.upsert(&sample_device("dev-1", "sales")).unwrap();
        store.upsert(&sample_device("dev-2", "support")).unwrap();

        let found = store.find_by_session("support").unwrap().unwrap();
        assert_eq!(found.id, "dev-2");
        assert!(store.find_by_session("marketing").unwrap().is_none());
    }

    #[test]
    fn test_update_status_and_phone() {
        let store = in_memory_store();
        store.upsert(&sample_device("dev-1", "sales")).unwrap();

        assert!(store.update_status("dev-1", DeviceStatus::Connected).unwrap());
        assert!(store.set_phone_number("dev-1", "5511999990000").unwrap());

        let loaded = store.get_device("dev-1").unwrap().unwrap();
        assert_eq!(loaded.status, DeviceStatus::Connected);
        assert_eq!(loaded.phone_number.as_deref(), Some("5511999990000"));
    }

    #[test]
    fn test_update_status_unknown_device() {
        let store = in_memory_store();
        assert!(!store.update_status("ghost", DeviceStatus::Connected).unwrap());
    }
}
