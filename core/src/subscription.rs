//! The per-user subscription record and its read-only projections.

use crate::{
    catalog::{FINAL_STAGE, FIRST_STAGE},
    types::{Stage, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    pub user_id:       UserId,
    pub stage:         Stage,
    pub is_processing: bool,
    pub is_completed:  bool,
    /// Opaque proof-of-payment bytes. Never inspected.
    pub receipt:       Option<Vec<u8>>,
    pub updated_at:    DateTime<Utc>,
    /// Bumped by the store on every conditional save. A save carrying a
    /// stale version is refused.
    pub version:       i64,
}

/// Field values for a record created on first upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordDefaults {
    pub stage:         Stage,
    pub is_processing: bool,
    pub is_completed:  bool,
}

impl RecordDefaults {
    pub const FIRST_UPLOAD: Self = Self {
        stage:         FIRST_STAGE,
        is_processing: true,
        is_completed:  false,
    };
}

impl SubscriptionRecord {
    pub fn new(user_id: UserId, defaults: RecordDefaults, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            stage:         defaults.stage,
            is_processing: defaults.is_processing,
            is_completed:  defaults.is_completed,
            receipt:       None,
            updated_at:    now,
            version:       0,
        }
    }

    pub fn has_pending_receipt(&self) -> bool {
        self.receipt.as_ref().is_some_and(|r| !r.is_empty())
    }

    pub fn is_terminal(&self) -> bool {
        self.stage == FINAL_STAGE && self.is_completed
    }

    pub fn status(&self) -> StageStatus {
        StageStatus {
            stage:         self.stage,
            is_processing: self.is_processing,
            is_completed:  self.is_completed,
        }
    }
}

/// Snapshot of where a user stands. Users without a record report the
/// virtual default `{1, false, false}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    pub stage:         Stage,
    pub is_processing: bool,
    pub is_completed:  bool,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self {
            stage:         FIRST_STAGE,
            is_processing: false,
            is_completed:  false,
        }
    }
}
