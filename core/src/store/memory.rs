//! In-memory store. Same contract as `SqliteStore`, nothing survives the process.

use super::{SubscriptionStore, WithdrawalStore};
use crate::{
    error::{StageError, StageResult},
    subscription::{RecordDefaults, SubscriptionRecord},
    types::UserId,
    withdrawal::{WithdrawalRecord, WithdrawalStatus},
};
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    subscriptions: Mutex<HashMap<UserId, SubscriptionRecord>>,
    withdrawals:   Mutex<Vec<WithdrawalRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscription_count(&self) -> StageResult<usize> {
        Ok(lock(&self.subscriptions)?.len())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> StageResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StageError::unavailable("memory store lock poisoned"))
}

impl SubscriptionStore for MemoryStore {
    fn get(&self, user_id: &str) -> StageResult<Option<SubscriptionRecord>> {
        Ok(lock(&self.subscriptions)?.get(user_id).cloned())
    }

    fn get_or_create(
        &self,
        user_id: &str,
        defaults: RecordDefaults,
        now: DateTime<Utc>,
    ) -> StageResult<(SubscriptionRecord, bool)> {
        let mut records = lock(&self.subscriptions)?;
        if let Some(existing) = records.get(user_id) {
            return Ok((existing.clone(), false));
        }
        let record = SubscriptionRecord::new(user_id.to_string(), defaults, now);
        records.insert(user_id.to_string(), record.clone());
        Ok((record, true))
    }

    fn save(&self, record: &SubscriptionRecord) -> StageResult<()> {
        lock(&self.subscriptions)?.insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    fn compare_and_save(&self, record: &SubscriptionRecord) -> StageResult<bool> {
        let mut records = lock(&self.subscriptions)?;
        match records.get_mut(&record.user_id) {
            Some(stored) if stored.version == record.version => {
                *stored = SubscriptionRecord {
                    version: record.version + 1,
                    ..record.clone()
                };
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl WithdrawalStore for MemoryStore {
    fn insert_withdrawal(&self, record: &WithdrawalRecord) -> StageResult<()> {
        let mut rows = lock(&self.withdrawals)?;
        if rows.iter().any(|w| w.id == record.id) {
            return Err(anyhow::anyhow!("withdrawal {} already exists", record.id).into());
        }
        rows.push(record.clone());
        Ok(())
    }

    fn withdrawals_for(
        &self,
        user_id: &str,
        status: WithdrawalStatus,
    ) -> StageResult<Vec<WithdrawalRecord>> {
        Ok(lock(&self.withdrawals)?
            .iter()
            .filter(|w| w.user_id == user_id && w.status == status)
            .cloned()
            .collect())
    }
}
