use super::{parse_timestamp, SqliteStore, WithdrawalStore};
use crate::{
    error::StageResult,
    withdrawal::{WithdrawalRecord, WithdrawalStatus},
};
use rusqlite::params;

impl WithdrawalStore for SqliteStore {
    fn insert_withdrawal(&self, record: &WithdrawalRecord) -> StageResult<()> {
        self.conn()?.execute(
            "INSERT INTO withdrawal (id, user_id, amount, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &record.id,
                &record.user_id,
                record.amount,
                record.status.as_str(),
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn withdrawals_for(
        &self,
        user_id: &str,
        status: WithdrawalStatus,
    ) -> StageResult<Vec<WithdrawalRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, amount, status, created_at
             FROM withdrawal WHERE user_id = ?1 AND status = ?2
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id, status.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    parse_timestamp(4, &row.get::<_, String>(4)?)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, user_id, amount, status, created_at)| -> StageResult<WithdrawalRecord> {
                Ok(WithdrawalRecord {
                    id,
                    user_id,
                    amount,
                    status: status.parse()?,
                    created_at,
                })
            })
            .collect()
    }
}
