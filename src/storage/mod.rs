//! Shared SQLite database.
//!
//! Devices, campaigns and delivery records live in one database so the
//! capacity query can join ledger rows against the campaigns that reference a
//! device. Each store holds a clone of [`Database`].

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id           TEXT PRIMARY KEY,
    phone_number TEXT,
    display_name TEXT NOT NULL,
    status       TEXT NOT NULL,
    session_name TEXT UNIQUE NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS campaigns (
    id                 TEXT PRIMARY KEY,
    name               TEXT NOT NULL,
    status             TEXT NOT NULL,
    connection_id      TEXT,
    device_ids         TEXT NOT NULL,
    message_variations TEXT NOT NULL,
    schedule           TEXT,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS delivery_records (
    id                  TEXT PRIMARY KEY,
    campaign_id         TEXT NOT NULL,
    provider_message_id TEXT,
    recipient           TEXT NOT NULL,
    device_id           TEXT,
    sender_phone        TEXT,
    status              TEXT NOT NULL,
    status_rank         INTEGER NOT NULL,
    sent_at             INTEGER,
    delivered_at        INTEGER,
    read_at             INTEGER,
    failed_at           INTEGER,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    UNIQUE(campaign_id, provider_message_id)
);

CREATE INDEX IF NOT EXISTS idx_delivery_provider_id ON delivery_records(provider_message_id);
CREATE INDEX IF NOT EXISTS idx_delivery_device_sent ON delivery_records(device_id, sent_at);
CREATE INDEX IF NOT EXISTS idx_delivery_pending ON delivery_records(recipient, status);
"#;

/// Handle to the SQLite database shared by all stores.
///
/// The connection sits behind a `Mutex`; callers must not hold the guard
/// across an `.await`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at `db_path` and ensures the schema exists.
    ///
    /// `":memory:"` gives a private in-memory database, used by tests.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to configure database")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens a fresh in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Locks the connection.
    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }
}

/// Encodes a list as the JSON text stored in list-valued columns.
pub(crate) fn encode_list(values: &[String]) -> Result<String> {
    serde_json::to_string(values).context("Failed to encode list column")
}

/// Decodes a JSON list column. Used inside rusqlite row mappers.
pub(crate) fn decode_list(raw: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}
