use super::{parse_stage, parse_timestamp, SqliteStore, SubscriptionStore};
use crate::{
    error::StageResult,
    subscription::{RecordDefaults, SubscriptionRecord},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

impl SubscriptionStore for SqliteStore {
    fn get(&self, user_id: &str) -> StageResult<Option<SubscriptionRecord>> {
        let conn = self.conn()?;
        select_subscription(&conn, user_id)
    }

    fn get_or_create(
        &self,
        user_id: &str,
        defaults: RecordDefaults,
        now: DateTime<Utc>,
    ) -> StageResult<(SubscriptionRecord, bool)> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO subscription (user_id, stage, is_processing, is_completed, receipt, updated_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)
             ON CONFLICT(user_id) DO NOTHING",
            params![
                user_id,
                defaults.stage as i64,
                defaults.is_processing as i32,
                defaults.is_completed as i32,
                now.to_rfc3339(),
            ],
        )?;
        let record = select_subscription(&conn, user_id)?.ok_or_else(|| {
            anyhow::anyhow!("subscription for {user_id} vanished after insert")
        })?;
        Ok((record, inserted == 1))
    }

    fn save(&self, record: &SubscriptionRecord) -> StageResult<()> {
        self.conn()?.execute(
            "INSERT INTO subscription (user_id, stage, is_processing, is_completed, receipt, updated_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id) DO UPDATE SET
                stage         = excluded.stage,
                is_processing = excluded.is_processing,
                is_completed  = excluded.is_completed,
                receipt       = excluded.receipt,
                updated_at    = excluded.updated_at,
                version       = excluded.version",
            params![
                &record.user_id,
                record.stage as i64,
                record.is_processing as i32,
                record.is_completed as i32,
                record.receipt.as_deref(),
                record.updated_at.to_rfc3339(),
                record.version,
            ],
        )?;
        Ok(())
    }

    fn compare_and_save(&self, record: &SubscriptionRecord) -> StageResult<bool> {
        let updated = self.conn()?.execute(
            "UPDATE subscription SET
                stage         = ?2,
                is_processing = ?3,
                is_completed  = ?4,
                receipt       = ?5,
                updated_at    = ?6,
                version       = version + 1
             WHERE user_id = ?1 AND version = ?7",
            params![
                &record.user_id,
                record.stage as i64,
                record.is_processing as i32,
                record.is_completed as i32,
                record.receipt.as_deref(),
                record.updated_at.to_rfc3339(),
                record.version,
            ],
        )?;
        if updated == 0 {
            log::debug!(
                "store: stale write for {} at version {}",
                record.user_id,
                record.version
            );
        }
        Ok(updated == 1)
    }
}

impl SqliteStore {
    // ── Reporting ─────────────────────────────────────────────────

    pub fn subscription_count(&self) -> StageResult<i64> {
        let count = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM subscription", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn qualified_user_count(&self) -> StageResult<i64> {
        let count = self.conn()?.query_row(
            "SELECT COUNT(*) FROM subscription WHERE stage = 5 AND is_completed = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn select_subscription(conn: &Connection, user_id: &str) -> StageResult<Option<SubscriptionRecord>> {
    let record = conn
        .query_row(
            "SELECT user_id, stage, is_processing, is_completed, receipt, updated_at, version
             FROM subscription WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(SubscriptionRecord {
                    user_id:       row.get(0)?,
                    stage:         parse_stage(1, row.get(1)?)?,
                    is_processing: row.get::<_, i32>(2)? != 0,
                    is_completed:  row.get::<_, i32>(3)? != 0,
                    receipt:       row.get(4)?,
                    updated_at:    parse_timestamp(5, &row.get::<_, String>(5)?)?,
                    version:       row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}
