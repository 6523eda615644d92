//! SQLite-backed campaign store.

use super::{Campaign, CampaignStatus, CampaignStore};
use crate::ledger::delete_campaign_records;
use crate::storage::{decode_list, encode_list, Database};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

pub struct SqliteCampaignStore {
    db: Database,
}

impl SqliteCampaignStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

const SELECT_CAMPAIGN: &str = "SELECT id, name, status, connection_id, device_ids, \
     message_variations, schedule FROM campaigns";

fn campaign_from_row(row: &Row<'_>) -> rusqlite::Result<Campaign> {
    let status: String = row.get(2)?;
    let status = CampaignStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown campaign status '{}'", status).into(),
        )
    })?;
    let device_ids: String = row.get(4)?;
    let variations: String = row.get(5)?;
    let schedule: Option<String> = row.get(6)?;
    Ok(Campaign {
        id: row.get(0)?,
        name: row.get(1)?,
        status,
        connection_id: row.get(3)?,
        device_ids: decode_list(&device_ids)?,
        message_variations: decode_list(&variations)?,
        schedule: schedule.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

impl CampaignStore for SqliteCampaignStore {
    fn insert(&self, campaign: &Campaign) -> Result<bool> {
        let device_ids = encode_list(&campaign.device_ids)?;
        let variations = encode_list(&campaign.message_variations)?;
        let schedule = campaign
            .schedule
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode campaign schedule")?;
        let now = Utc::now().to_rfc3339();

        let conn = self.db.conn()?;
        let rows = conn.execute(
            r#"
            INSERT INTO campaigns (
                id, name, status, connection_id, device_ids,
                message_variations, schedule, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                campaign.id,
                campaign.name,
                campaign.status.as_str(),
                campaign.connection_id,
                device_ids,
                variations,
                schedule,
                now,
                now,
            ],
        )
        .context("Failed to insert campaign")?;
        Ok(rows > 0)
    }

    fn get(&self, id: &str) -> Result<Option<Campaign>> {
        let conn = self.db.conn()?;
        conn.query_row(
            &format!("{} WHERE id = ?1", SELECT_CAMPAIGN),
            params![id],
            campaign_from_row,
        )
        .optional()
        .context("Failed to load campaign")
    }

    fn campaigns_referencing_device(
        &self,
        device_id: &str,
        statuses: &[CampaignStatus],
    ) -> Result<Vec<Campaign>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        // ?1 is the device id, ?2.. are the statuses
        let placeholders: Vec<String> = (0..statuses.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "{} WHERE status IN ({}) AND (connection_id = ?1 OR EXISTS \
             (SELECT 1 FROM json_each(campaigns.device_ids) WHERE json_each.value = ?1)) \
             ORDER BY created_at ASC",
            SELECT_CAMPAIGN,
            placeholders.join(", ")
        );

        let mut values: Vec<String> = Vec::with_capacity(statuses.len() + 1);
        values.push(device_id.to_string());
        values.extend(statuses.iter().map(|s| s.as_str().to_string()));

        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&sql)
            .context("Failed to prepare campaigns-by-device query")?;
        let campaigns = stmt
            .query_map(params_from_iter(values.iter()), campaign_from_row)
            .context("Failed to query campaigns by device")?
            .collect::<rusqlite::Result<Vec<Campaign>>>()
            .context("Failed to read campaign rows")?;
        Ok(campaigns)
    }

    fn update_campaign_status(&self, id: &str, status: CampaignStatus) -> Result<bool> {
        let conn = self.db.conn()?;
        let rows = conn
            .execute(
                "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .context("Failed to update campaign status")?;
        Ok(rows > 0)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        delete_campaign_records(&tx, id)?;
        let rows = tx
            .execute("DELETE FROM campaigns WHERE id = ?1", params![id])
            .context("Failed to delete campaign")?;
        tx.commit().context("Failed to commit campaign deletion")?;
        Ok(rows > 0)
    }
}
