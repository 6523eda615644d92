//! SQLite-backed delivery store.

use super::{
    ApplyOutcome, CreateOutcome, DeliveryRecord, DeliveryStatus, DeliveryStore, OutgoingMessage,
    QueuedMessage,
};
use crate::storage::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{
    params, params_from_iter, types::Value as SqlValue, Connection, OptionalExtension, Row,
};
use uuid::Uuid;

/// Delivery records in SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE delivery_records (
///     id                  TEXT PRIMARY KEY,
///     campaign_id         TEXT NOT NULL,
///     provider_message_id TEXT,            -- NULL until the message leaves
///     recipient           TEXT NOT NULL,
///     device_id           TEXT,
///     sender_phone        TEXT,
///     status              TEXT NOT NULL,
///     status_rank         INTEGER NOT NULL, -- DeliveryStatus::rank
///     sent_at             INTEGER,          -- epoch millis
///     delivered_at        INTEGER,
///     read_at             INTEGER,
///     failed_at           INTEGER,
///     created_at          TEXT NOT NULL,
///     updated_at          TEXT NOT NULL,
///     UNIQUE(campaign_id, provider_message_id)
/// );
/// ```
pub struct SqliteDeliveryStore {
    db: Database,
}

impl SqliteDeliveryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

const SELECT_RECORD: &str = "SELECT id, campaign_id, provider_message_id, recipient, device_id, \
     sender_phone, status, sent_at, delivered_at, read_at, failed_at FROM delivery_records";

fn millis_to_datetime(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<DeliveryRecord> {
    let status: String = row.get(6)?;
    let status = DeliveryStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown delivery status '{}'", status).into(),
        )
    })?;
    Ok(DeliveryRecord {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        provider_message_id: row.get(2)?,
        recipient: row.get(3)?,
        device_id: row.get(4)?,
        sender_phone: row.get(5)?,
        status,
        sent_at: millis_to_datetime(row.get(7)?),
        delivered_at: millis_to_datetime(row.get(8)?),
        read_at: millis_to_datetime(row.get(9)?),
        failed_at: millis_to_datetime(row.get(10)?),
    })
}

/// SQL condition on the current `status_rank` under which `next` may be applied.
///
/// Mirrors [`DeliveryStatus::accepts`].
fn accepts_condition(next: DeliveryStatus) -> String {
    let failed = DeliveryStatus::Failed.rank();
    match next {
        DeliveryStatus::Failed => format!(
            "(status_rank < {} OR status_rank = {})",
            DeliveryStatus::Read.rank(),
            failed
        ),
        other => format!("status_rank <= {}", other.rank()),
    }
}

impl DeliveryStore for SqliteDeliveryStore {
    fn enqueue(&self, message: &QueuedMessage) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.db.conn()?;
        conn.execute(
            r#"
            INSERT INTO delivery_records (
                id, campaign_id, recipient, device_id, status, status_rank,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                id,
                message.campaign_id,
                message.recipient,
                message.device_id,
                DeliveryStatus::Queued.as_str(),
                DeliveryStatus::Queued.rank(),
                now,
                now,
            ],
        )
        .context("Failed to enqueue delivery record")?;
        Ok(id)
    }

    fn find_pending_campaign(&self, device_id: &str, recipient: &str) -> Result<Option<String>> {
        let conn = self.db.conn()?;
        conn.query_row(
            r#"
            SELECT d.campaign_id
            FROM delivery_records d
            JOIN campaigns c ON c.id = d.campaign_id
            WHERE d.recipient = ?2
              AND d.provider_message_id IS NULL
              AND d.status = 'queued'
              AND c.status IN ('running', 'paused')
              AND (c.connection_id = ?1 OR EXISTS
                    (SELECT 1 FROM json_each(c.device_ids) WHERE json_each.value = ?1))
            ORDER BY d.created_at ASC, d.id ASC
            LIMIT 1
            "#,
            params![device_id, recipient],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to correlate outgoing message with a campaign")
    }

    fn create_if_absent(&self, message: &OutgoingMessage) -> Result<CreateOutcome> {
        let at = message.at.timestamp_millis();
        let sent_at = if message.status.is_sent() { Some(at) } else { None };
        let now = Utc::now().to_rfc3339();

        let mut conn = self.db.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        // A provider message belongs to at most one campaign
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM delivery_records WHERE provider_message_id = ?1 LIMIT 1",
                params![message.provider_message_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to check for existing delivery record")?;
        if exists.is_some() {
            return Ok(CreateOutcome::AlreadyPresent);
        }

        // Bind the oldest queued record for this recipient, if any
        let bound = tx
            .execute(
                r#"
                UPDATE delivery_records SET
                    provider_message_id = ?1,
                    device_id = ?2,
                    sender_phone = ?3,
                    status = ?4,
                    status_rank = ?5,
                    sent_at = COALESCE(sent_at, ?6),
                    updated_at = ?7
                WHERE id = (
                    SELECT id FROM delivery_records
                    WHERE campaign_id = ?8
                      AND recipient = ?9
                      AND provider_message_id IS NULL
                      AND status = 'queued'
                    ORDER BY created_at ASC, id ASC
                    LIMIT 1
                )
                "#,
                params![
                    message.provider_message_id,
                    message.device_id,
                    message.sender_phone,
                    message.status.as_str(),
                    message.status.rank(),
                    sent_at,
                    now,
                    message.campaign_id,
                    message.recipient,
                ],
            )
            .context("Failed to bind queued delivery record")?;

        let outcome = if bound > 0 {
            CreateOutcome::Bound
        } else {
            let inserted = tx
                .execute(
                    r#"
                    INSERT INTO delivery_records (
                        id, campaign_id, provider_message_id, recipient, device_id,
                        sender_phone, status, status_rank, sent_at, created_at, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    ON CONFLICT(campaign_id, provider_message_id) DO NOTHING
                    "#,
                    params![
                        Uuid::now_v7().to_string(),
                        message.campaign_id,
                        message.provider_message_id,
                        message.recipient,
                        message.device_id,
                        message.sender_phone,
                        message.status.as_str(),
                        message.status.rank(),
                        sent_at,
                        now,
                        now,
                    ],
                )
                .context("Failed to insert delivery record")?;
            if inserted > 0 {
                CreateOutcome::Inserted
            } else {
                CreateOutcome::AlreadyPresent
            }
        };

        tx.commit().context("Failed to commit delivery record")?;
        Ok(outcome)
    }

    fn apply_status(
        &self,
        provider_message_id: &str,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        let at = at.timestamp_millis();
        let rank = status.rank();
        let now = Utc::now().to_rfc3339();

        // Timestamps are first-write-wins. Reaching delivered or read
        // back-fills the earlier milestones so skipped states still count.
        let sql = format!(
            r#"
            UPDATE delivery_records SET
                status = ?2,
                status_rank = ?3,
                sent_at = CASE WHEN ?3 BETWEEN 1 AND 3 THEN COALESCE(sent_at, ?4) ELSE sent_at END,
                delivered_at = CASE WHEN ?3 BETWEEN 2 AND 3 THEN COALESCE(delivered_at, ?4) ELSE delivered_at END,
                read_at = CASE WHEN ?3 = 3 THEN COALESCE(read_at, ?4) ELSE read_at END,
                failed_at = CASE WHEN ?3 = 4 THEN COALESCE(failed_at, ?4) ELSE failed_at END,
                updated_at = ?5
            WHERE provider_message_id = ?1 AND {}
            "#,
            accepts_condition(status)
        );

        let conn = self.db.conn()?;
        let updated = conn
            .execute(
                &sql,
                params![provider_message_id, status.as_str(), rank, at, now],
            )
            .context("Failed to apply delivery status")?;
        if updated > 0 {
            return Ok(ApplyOutcome::Applied(updated));
        }

        let existing: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM delivery_records WHERE provider_message_id = ?1",
                params![provider_message_id],
                |row| row.get(0),
            )
            .context("Failed to check delivery record existence")?;
        if existing > 0 {
            Ok(ApplyOutcome::Stale)
        } else {
            Ok(ApplyOutcome::Missing)
        }
    }

    fn count_sent_since(
        &self,
        device_id: &str,
        campaign_ids: &[String],
        since: DateTime<Utc>,
    ) -> Result<u64> {
        if campaign_ids.is_empty() {
            return Ok(0);
        }

        // ?1 device, ?2 since, ?3.. campaign ids
        let placeholders: Vec<String> =
            (0..campaign_ids.len()).map(|i| format!("?{}", i + 3)).collect();
        let sql = format!(
            "SELECT COUNT(*) FROM delivery_records
             WHERE device_id = ?1
               AND status IN ('sent', 'delivered', 'read')
               AND sent_at >= ?2
               AND campaign_id IN ({})",
            placeholders.join(", ")
        );

        let mut values: Vec<SqlValue> = Vec::with_capacity(campaign_ids.len() + 2);
        values.push(SqlValue::Text(device_id.to_string()));
        values.push(SqlValue::Integer(since.timestamp_millis()));
        values.extend(campaign_ids.iter().map(|id| SqlValue::Text(id.clone())));

        let conn = self.db.conn()?;
        let count: i64 = conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
            .context("Failed to count sent messages")?;
        Ok(count.max(0) as u64)
    }

    fn get_by_provider_id(&self, provider_message_id: &str) -> Result<Vec<DeliveryRecord>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE provider_message_id = ?1 ORDER BY created_at",
                SELECT_RECORD
            ))
            .context("Failed to prepare query")?;
        let records = stmt
            .query_map(params![provider_message_id], record_from_row)
            .context("Failed to query delivery records")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read delivery records")?;
        Ok(records)
    }

    fn list_for_campaign(&self, campaign_id: &str) -> Result<Vec<DeliveryRecord>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE campaign_id = ?1 ORDER BY created_at, id",
                SELECT_RECORD
            ))
            .context("Failed to prepare query")?;
        let records = stmt
            .query_map(params![campaign_id], record_from_row)
            .context("Failed to query delivery records")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read delivery records")?;
        Ok(records)
    }

    fn delete_for_campaign(&self, campaign_id: &str) -> Result<usize> {
        let conn = self.db.conn()?;
        delete_campaign_records(&conn, campaign_id)
    }
}

/// Deletes every record of `campaign_id`. Shared with the campaign store so
/// campaign deletion can cascade inside its own transaction.
pub(crate) fn delete_campaign_records(conn: &Connection, campaign_id: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM delivery_records WHERE campaign_id = ?1",
        params![campaign_id],
    )
    .context("Failed to delete delivery records")
}

/// Looks up a single record by id. Test helper.
#[cfg(test)]
pub(crate) fn get_record(store: &SqliteDeliveryStore, id: &str) -> Result<Option<DeliveryRecord>> {
    let conn = store.db.conn()?;
    conn.query_row(
        &format!("{} WHERE id = ?1", SELECT_RECORD),
        params![id],
        record_from_row,
    )
    .optional()
    .context("Failed to load delivery record")
}
