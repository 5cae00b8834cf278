//! Withdrawal records and the read-only pending-withdrawal query.
//!
//! No state transitions live here. Records are written by whatever
//! back office process approves payouts; this module only filters them.

use crate::{
    error::{StageError, StageResult},
    store::WithdrawalStore,
    types::{Amount, UserId, WithdrawalId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending  => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawalStatus {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"  => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(anyhow::anyhow!("unknown withdrawal status '{other}'").into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub id:         WithdrawalId,
    pub user_id:    UserId,
    pub amount:     Amount,
    pub status:     WithdrawalStatus,
    pub created_at: DateTime<Utc>,
}

impl WithdrawalRecord {
    pub fn new(user_id: UserId, amount: Amount, status: WithdrawalStatus, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            amount,
            status,
            created_at: now,
        }
    }
}

/// Read-only filter over withdrawal records.
pub struct WithdrawalQuery {
    store: Arc<dyn WithdrawalStore>,
}

impl WithdrawalQuery {
    pub fn new(store: Arc<dyn WithdrawalStore>) -> Self {
        Self { store }
    }

    /// The user's own pending withdrawals, oldest first.
    pub fn pending_for(&self, user_id: &str) -> StageResult<Vec<WithdrawalRecord>> {
        self.by_status(user_id, WithdrawalStatus::Pending)
    }

    pub fn by_status(
        &self,
        user_id: &str,
        status: WithdrawalStatus,
    ) -> StageResult<Vec<WithdrawalRecord>> {
        let mut rows = self.store.withdrawals_for(user_id, status)?;
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }
}
