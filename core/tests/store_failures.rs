//! A store that cannot be reached surfaces as a retryable
//! `StoreUnavailable` from every machine operation, and leaves the
//! user's record as it was.

use chrono::{DateTime, Utc};
use stagepay_core::{
    catalog::StageCatalog,
    clock::SystemClock,
    error::{StageError, StageResult},
    state_machine::SubscriptionMachine,
    store::{MemoryStore, SubscriptionStore},
    subscription::{RecordDefaults, SubscriptionRecord},
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Wraps a `MemoryStore` and fails reads or writes on demand.
#[derive(Default)]
struct FlakyStore {
    inner:       MemoryStore,
    fail_reads:  AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    fn check(flag: &AtomicBool, what: &str) -> StageResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StageError::unavailable(format!("{what} timed out")));
        }
        Ok(())
    }
}

impl SubscriptionStore for FlakyStore {
    fn get(&self, user_id: &str) -> StageResult<Option<SubscriptionRecord>> {
        Self::check(&self.fail_reads, "read")?;
        self.inner.get(user_id)
    }

    fn get_or_create(
        &self,
        user_id: &str,
        defaults: RecordDefaults,
        now: DateTime<Utc>,
    ) -> StageResult<(SubscriptionRecord, bool)> {
        Self::check(&self.fail_writes, "insert")?;
        self.inner.get_or_create(user_id, defaults, now)
    }

    fn save(&self, record: &SubscriptionRecord) -> StageResult<()> {
        Self::check(&self.fail_writes, "save")?;
        self.inner.save(record)
    }

    fn compare_and_save(&self, record: &SubscriptionRecord) -> StageResult<bool> {
        Self::check(&self.fail_writes, "save")?;
        self.inner.compare_and_save(record)
    }
}

fn setup() -> (SubscriptionMachine, Arc<FlakyStore>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = Arc::new(FlakyStore::default());
    let machine = SubscriptionMachine::new(
        store.clone(),
        StageCatalog::standard(),
        Arc::new(SystemClock),
        Duration::from_secs(2),
    );
    (machine, store)
}

fn assert_unavailable<T: std::fmt::Debug>(result: StageResult<T>) {
    match result {
        Err(e @ StageError::StoreUnavailable { .. }) => {
            assert!(e.is_retryable());
            assert_eq!(e.code(), "store_unavailable");
        }
        other => panic!("expected StoreUnavailable, got {other:?}"),
    }
}

#[test]
fn failed_reads_reach_every_caller() {
    let (machine, store) = setup();
    machine.upload_receipt("ann", Some(b"scan".to_vec())).unwrap();
    let before = store.inner.get("ann").unwrap();

    store.fail_reads.store(true, Ordering::SeqCst);
    assert_unavailable(machine.upload_receipt("ann", Some(b"again".to_vec())));
    assert_unavailable(machine.complete_stage("ann"));
    assert_unavailable(machine.status("ann"));
    assert_unavailable(machine.is_qualified("ann"));
    assert_unavailable(machine.status("never-seen"));

    store.fail_reads.store(false, Ordering::SeqCst);
    assert_eq!(store.inner.get("ann").unwrap(), before);
}

#[test]
fn failed_writes_leave_record_unchanged() {
    let (machine, store) = setup();
    machine.upload_receipt("ann", Some(b"scan".to_vec())).unwrap();
    machine.complete_stage("ann").unwrap();
    let before = store.inner.get("ann").unwrap();

    store.fail_writes.store(true, Ordering::SeqCst);
    assert_unavailable(machine.upload_receipt("ann", Some(b"stage-2".to_vec())));
    assert_unavailable(machine.upload_receipt("ben", Some(b"first".to_vec())));
    store.fail_writes.store(false, Ordering::SeqCst);

    assert_eq!(store.inner.get("ann").unwrap(), before);
    assert!(store.inner.get("ben").unwrap().is_none(), "no record for a failed first upload");

    // Stage 2 is now pending; a failed completion keeps it pending.
    machine.upload_receipt("ann", Some(b"stage-2".to_vec())).unwrap();
    let pending = store.inner.get("ann").unwrap();
    store.fail_writes.store(true, Ordering::SeqCst);
    assert_unavailable(machine.complete_stage("ann"));
    store.fail_writes.store(false, Ordering::SeqCst);
    assert_eq!(store.inner.get("ann").unwrap(), pending);

    let status = machine.status("ann").unwrap();
    assert_eq!((status.stage, status.is_processing), (2, true));
}
