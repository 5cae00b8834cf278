//! Subscription stage state machine.
//!
//! STATES (per user):
//!   NoRecord
//!   Stage(n, processing, completed)   n in 1..=5
//!
//! TRANSITIONS:
//!   NoRecord          --upload-->   Stage(1, true, false)
//!   Stage(n, false, _) --upload-->  Stage(n, true, false)
//!   Stage(n, true, _)  --complete--> Stage(n+1, false, false)   n < 5
//!   Stage(5, true, _)  --complete--> Stage(5, false, true)      terminal
//!
//! Stage(5, false, true) accepts neither upload nor complete.
//!
//! The guard and mutation functions below are pure. `SubscriptionMachine`
//! runs them inside a per-user lock, so requests for one user in this
//! process queue up. Writes go through the store's compare-and-save, so a
//! request from another process that read the same version loses, re-reads
//! and is judged against the new state.

use crate::{
    catalog::{StageCatalog, FINAL_STAGE},
    clock::Clock,
    error::{StageError, StageResult},
    locks::KeyedLocks,
    store::SubscriptionStore,
    subscription::{RecordDefaults, StageStatus, SubscriptionRecord},
    types::{Amount, Stage},
};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Stage the receipt was filed against.
    pub stage:   Stage,
    /// True when this upload created the user's record.
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompleteOutcome {
    /// Stage that was just marked complete.
    pub completed_stage:   Stage,
    /// Stage the user is on after the transition.
    pub stage:             Stage,
    /// Amount due for the new stage. None once every stage is complete.
    pub next_stage_amount: Option<Amount>,
}

impl CompleteOutcome {
    pub fn all_stages_completed(&self) -> bool {
        self.next_stage_amount.is_none()
    }
}

// ── Pure transitions ─────────────────────────────────────────────

/// Reject an upload while a receipt is under review or once every stage
/// is complete, then reject an absent or empty receipt. Returns the
/// receipt bytes when accepted.
pub fn check_upload<'a>(
    existing: Option<&SubscriptionRecord>,
    receipt: Option<&'a [u8]>,
) -> StageResult<&'a [u8]> {
    if let Some(record) = existing {
        if record.is_processing {
            return Err(StageError::AlreadyProcessing { stage: record.stage });
        }
        if record.is_terminal() {
            return Err(StageError::AllStagesCompleted);
        }
    }
    match receipt {
        Some(bytes) if !bytes.is_empty() => Ok(bytes),
        _ => Err(StageError::MissingReceipt),
    }
}

pub fn apply_upload(record: &mut SubscriptionRecord, receipt: Vec<u8>, now: DateTime<Utc>) {
    record.receipt = Some(receipt);
    record.is_processing = true;
    record.is_completed = false;
    record.updated_at = now;
}

/// Mark the current stage complete and advance. Stage 5 is terminal:
/// it stays at 5 with `is_completed` set.
pub fn apply_complete(
    record: &mut SubscriptionRecord,
    catalog: &StageCatalog,
    now: DateTime<Utc>,
) -> StageResult<CompleteOutcome> {
    if !record.is_processing && !record.has_pending_receipt() {
        return Err(StageError::NothingToComplete { stage: record.stage });
    }

    let completed_stage = record.stage;
    record.is_processing = false;
    record.is_completed = true;
    record.receipt = None;
    record.updated_at = now;

    let next_stage_amount = if record.stage < FINAL_STAGE {
        record.stage += 1;
        record.is_completed = false;
        Some(catalog.amount_for(record.stage))
    } else {
        None
    };

    Ok(CompleteOutcome {
        completed_stage,
        stage: record.stage,
        next_stage_amount,
    })
}

// ── Orchestration ────────────────────────────────────────────────

/// Conditional writes refused this many times in a row give up as a
/// transient failure.
const MAX_WRITE_ATTEMPTS: usize = 5;

fn write_conflict(user_id: &str) -> StageError {
    log::warn!("subscription: gave up on {user_id} after {MAX_WRITE_ATTEMPTS} conflicting writes");
    StageError::unavailable(format!("conflicting concurrent writes for {user_id}"))
}

pub struct SubscriptionMachine {
    store:   Arc<dyn SubscriptionStore>,
    catalog: StageCatalog,
    locks:   KeyedLocks,
    clock:   Arc<dyn Clock>,
}

impl SubscriptionMachine {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        catalog: StageCatalog,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            locks: KeyedLocks::new(lock_timeout),
            clock,
        }
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    /// File a receipt for the user's current stage.
    ///
    /// An empty or absent receipt never creates a record.
    pub fn upload_receipt(
        &self,
        user_id: &str,
        receipt: Option<Vec<u8>>,
    ) -> StageResult<UploadOutcome> {
        let _guard = self.locks.acquire(user_id)?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let existing = self.store.get(user_id)?;
            let bytes = check_upload(existing.as_ref(), receipt.as_deref()).inspect_err(|e| {
                log::warn!("subscription: upload rejected for {user_id}: {e}");
            })?;

            let now = self.clock.now();
            let (mut record, created) = match existing {
                Some(record) => (record, false),
                None => {
                    let (record, created) =
                        self.store
                            .get_or_create(user_id, RecordDefaults::FIRST_UPLOAD, now)?;
                    // Another process may have created the row since our read.
                    if !created {
                        check_upload(Some(&record), Some(bytes)).inspect_err(|e| {
                            log::warn!("subscription: upload rejected for {user_id}: {e}");
                        })?;
                    }
                    (record, created)
                }
            };

            apply_upload(&mut record, bytes.to_vec(), now);
            if self.store.compare_and_save(&record)? {
                log::info!(
                    "subscription: {user_id} uploaded receipt for stage {} (new record: {created})",
                    record.stage
                );
                return Ok(UploadOutcome { stage: record.stage, created });
            }
            log::debug!("subscription: concurrent write on {user_id}, re-reading");
        }
        Err(write_conflict(user_id))
    }

    /// Mark the user's current stage reviewed and advance.
    pub fn complete_stage(&self, user_id: &str) -> StageResult<CompleteOutcome> {
        let _guard = self.locks.acquire(user_id)?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut record = self.store.get(user_id)?.ok_or_else(|| {
                log::warn!("subscription: complete rejected for {user_id}: no record");
                StageError::NoSubscription
            })?;

            let outcome = apply_complete(&mut record, &self.catalog, self.clock.now())
                .inspect_err(|e| log::warn!("subscription: complete rejected for {user_id}: {e}"))?;
            if !self.store.compare_and_save(&record)? {
                log::debug!("subscription: concurrent write on {user_id}, re-reading");
                continue;
            }

            match outcome.next_stage_amount {
                Some(amount) => log::info!(
                    "subscription: {user_id} completed stage {}, now on stage {} (due {amount})",
                    outcome.completed_stage,
                    outcome.stage
                ),
                None => log::info!("subscription: {user_id} completed all stages"),
            }
            return Ok(outcome);
        }
        Err(write_conflict(user_id))
    }

    /// Current standing, or the virtual default for users with no record.
    pub fn status(&self, user_id: &str) -> StageResult<StageStatus> {
        Ok(self
            .store
            .get(user_id)?
            .map(|r| r.status())
            .unwrap_or_default())
    }

    pub fn is_qualified(&self, user_id: &str) -> StageResult<bool> {
        Ok(self
            .store
            .get(user_id)?
            .is_some_and(|r| r.is_terminal()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(stage: Stage, processing: bool, completed: bool) -> SubscriptionRecord {
        let mut r = SubscriptionRecord::new(
            "u".into(),
            RecordDefaults {
                stage,
                is_processing: processing,
                is_completed: completed,
            },
            at(0),
        );
        if processing {
            r.receipt = Some(b"receipt".to_vec());
        }
        r
    }

    #[test]
    fn processing_guard_precedes_receipt_guard() {
        let busy = record(2, true, false);
        let err = check_upload(Some(&busy), None).unwrap_err();
        assert!(matches!(err, StageError::AlreadyProcessing { stage: 2 }));
    }

    #[test]
    fn empty_receipt_is_missing() {
        let idle = record(3, false, false);
        assert!(matches!(
            check_upload(Some(&idle), Some(&[][..])),
            Err(StageError::MissingReceipt)
        ));
        assert!(matches!(check_upload(None, None), Err(StageError::MissingReceipt)));
    }

    #[test]
    fn terminal_record_rejects_upload() {
        let done = record(FINAL_STAGE, false, true);
        assert!(matches!(
            check_upload(Some(&done), Some(&b"again"[..])),
            Err(StageError::AllStagesCompleted)
        ));

        let idle_final = record(FINAL_STAGE, false, false);
        assert_eq!(check_upload(Some(&idle_final), Some(&b"pay"[..])).unwrap(), b"pay");
    }

    #[test]
    fn upload_stamps_record() {
        let mut r = record(2, false, false);
        apply_upload(&mut r, b"pdf".to_vec(), at(60));
        assert!(r.is_processing);
        assert!(!r.is_completed);
        assert_eq!(r.receipt.as_deref(), Some(&b"pdf"[..]));
        assert_eq!(r.updated_at, at(60));
    }

    #[test]
    fn non_terminal_complete_advances_one_stage() {
        let catalog = StageCatalog::standard();
        for n in 1..FINAL_STAGE {
            let mut r = record(n, true, false);
            let out = apply_complete(&mut r, &catalog, at(1)).unwrap();
            assert_eq!(r.stage, n + 1);
            assert!(!r.is_processing);
            assert!(!r.is_completed);
            assert!(r.receipt.is_none());
            assert_eq!(out.completed_stage, n);
            assert_eq!(out.next_stage_amount, Some(catalog.amount_for(n + 1)));
        }
    }

    #[test]
    fn final_stage_complete_is_terminal() {
        let catalog = StageCatalog::standard();
        let mut r = record(FINAL_STAGE, true, false);
        let out = apply_complete(&mut r, &catalog, at(1)).unwrap();
        assert!(out.all_stages_completed());
        assert_eq!(r.status(), StageStatus { stage: 5, is_processing: false, is_completed: true });
        assert!(r.is_terminal());

        let again = apply_complete(&mut r, &catalog, at(2)).unwrap_err();
        assert!(matches!(again, StageError::NothingToComplete { stage: 5 }));
    }
}
