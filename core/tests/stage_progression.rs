//! Subscription stage progression tests.
//!
//! Drive a user from no record through all five stages and check the
//! guards that reject out-of-order requests.

use stagepay_core::{
    catalog::StageCatalog,
    clock::SystemClock,
    error::StageError,
    state_machine::SubscriptionMachine,
    store::{MemoryStore, SubscriptionStore},
    subscription::StageStatus,
};
use std::{sync::Arc, time::Duration};

fn build() -> (SubscriptionMachine, Arc<MemoryStore>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = Arc::new(MemoryStore::new());
    let machine = SubscriptionMachine::new(
        Arc::clone(&store) as Arc<dyn SubscriptionStore>,
        StageCatalog::standard(),
        Arc::new(SystemClock),
        Duration::from_secs(2),
    );
    (machine, store)
}

fn receipt(tag: &str) -> Option<Vec<u8>> {
    Some(format!("receipt-{tag}").into_bytes())
}

/// A user who has never uploaded reports the virtual default.
#[test]
fn status_without_record_is_stage_one_idle() {
    let (machine, store) = build();
    assert_eq!(machine.status("nobody").unwrap(), StageStatus::default());
    assert_eq!(
        machine.status("nobody").unwrap(),
        StageStatus { stage: 1, is_processing: false, is_completed: false }
    );
    assert!(!machine.is_qualified("nobody").unwrap());
    assert_eq!(store.subscription_count().unwrap(), 0, "reads must not create records");
}

/// Walk the documented scenario end to end.
#[test]
fn new_user_reaches_qualification() {
    let (machine, _store) = build();
    let user = "u-scenario";

    let up = machine.upload_receipt(user, receipt("1")).unwrap();
    assert_eq!(up.stage, 1);
    assert!(up.created);
    assert_eq!(
        machine.status(user).unwrap(),
        StageStatus { stage: 1, is_processing: true, is_completed: false }
    );

    let done = machine.complete_stage(user).unwrap();
    assert_eq!(done.stage, 2);
    assert_eq!(done.next_stage_amount, Some(1500));
    assert_eq!(
        machine.status(user).unwrap(),
        StageStatus { stage: 2, is_processing: false, is_completed: false }
    );

    let up = machine.upload_receipt(user, receipt("2")).unwrap();
    assert_eq!(up.stage, 2);
    assert!(!up.created);
    assert_eq!(
        machine.status(user).unwrap(),
        StageStatus { stage: 2, is_processing: true, is_completed: false }
    );

    let expected = [(3, Some(2000)), (4, Some(5000)), (5, Some(10000))];
    for (i, (stage, amount)) in expected.into_iter().enumerate() {
        if i > 0 {
            machine.upload_receipt(user, receipt(&stage.to_string())).unwrap();
        }
        let done = machine.complete_stage(user).unwrap();
        assert_eq!(done.stage, stage);
        assert_eq!(done.next_stage_amount, amount);
        assert!(!machine.is_qualified(user).unwrap());
    }

    machine.upload_receipt(user, receipt("5")).unwrap();
    let last = machine.complete_stage(user).unwrap();
    assert_eq!(last.completed_stage, 5);
    assert_eq!(last.stage, 5);
    assert!(last.all_stages_completed());
    assert_eq!(
        machine.status(user).unwrap(),
        StageStatus { stage: 5, is_processing: false, is_completed: true }
    );
    assert!(machine.is_qualified(user).unwrap());
}

/// A second upload before completion is a duplicate submission.
#[test]
fn second_upload_without_completion_is_rejected() {
    let (machine, store) = build();
    machine.upload_receipt("u-dup", receipt("a")).unwrap();

    let err = machine.upload_receipt("u-dup", receipt("b")).unwrap_err();
    assert!(matches!(err, StageError::AlreadyProcessing { stage: 1 }));
    assert!(!err.is_retryable());

    let record = store.get("u-dup").unwrap().unwrap();
    assert_eq!(record.receipt.as_deref(), Some(&b"receipt-a"[..]), "first receipt must be kept");
}

/// An empty or absent receipt is malformed and never creates a record.
#[test]
fn missing_receipt_is_rejected_without_creating_record() {
    let (machine, store) = build();

    assert!(matches!(
        machine.upload_receipt("u-empty", None),
        Err(StageError::MissingReceipt)
    ));
    assert!(matches!(
        machine.upload_receipt("u-empty", Some(Vec::new())),
        Err(StageError::MissingReceipt)
    ));
    assert!(store.get("u-empty").unwrap().is_none());
    assert_eq!(machine.status("u-empty").unwrap(), StageStatus::default());
}

/// Completing without a record or without a pending receipt fails.
#[test]
fn complete_requires_pending_submission() {
    let (machine, _store) = build();

    assert!(matches!(
        machine.complete_stage("u-none"),
        Err(StageError::NoSubscription)
    ));

    machine.upload_receipt("u-twice", receipt("1")).unwrap();
    machine.complete_stage("u-twice").unwrap();
    let err = machine.complete_stage("u-twice").unwrap_err();
    assert!(matches!(err, StageError::NothingToComplete { stage: 2 }));
    assert_eq!(machine.status("u-twice").unwrap().stage, 2, "failed completion must not advance");
}

/// Terminal state is permanent: further completions and uploads are
/// rejected and the user stays qualified.
#[test]
fn terminal_stage_rejects_further_completion_and_upload() {
    let (machine, _store) = build();
    let user = "u-terminal";
    for n in 1..=5 {
        machine.upload_receipt(user, receipt(&n.to_string())).unwrap();
        machine.complete_stage(user).unwrap();
    }
    assert!(machine.is_qualified(user).unwrap());

    let err = machine.complete_stage(user).unwrap_err();
    assert!(matches!(err, StageError::NothingToComplete { stage: 5 }));
    assert_eq!(
        machine.status(user).unwrap(),
        StageStatus { stage: 5, is_processing: false, is_completed: true }
    );
    assert!(machine.is_qualified(user).unwrap());

    let err = machine.upload_receipt(user, receipt("again")).unwrap_err();
    assert!(matches!(err, StageError::AllStagesCompleted));
    assert_eq!(err.code(), "all_stages_completed");
    assert!(!err.is_retryable());
    assert_eq!(
        machine.status(user).unwrap(),
        StageStatus { stage: 5, is_processing: false, is_completed: true }
    );
    assert!(machine.is_qualified(user).unwrap());
    assert!(matches!(
        machine.complete_stage(user),
        Err(StageError::NothingToComplete { stage: 5 })
    ));
}

/// Qualification holds only at (5, _, completed). Every earlier reachable
/// state, including stage 5 while processing, is unqualified.
#[test]
fn qualification_only_at_completed_final_stage() {
    let (machine, _store) = build();
    let user = "u-qual";
    for n in 1..=5u8 {
        assert!(!machine.is_qualified(user).unwrap(), "before upload at stage {n}");
        machine.upload_receipt(user, receipt(&n.to_string())).unwrap();
        assert!(!machine.is_qualified(user).unwrap(), "processing at stage {n}");
        machine.complete_stage(user).unwrap();
    }
    assert!(machine.is_qualified(user).unwrap());
}

/// Completion clears the receipt and never leaves processing and
/// completed set together.
#[test]
fn completion_clears_receipt_and_flags_are_exclusive() {
    let (machine, store) = build();
    let user = "u-flags";
    for n in 1..=5 {
        machine.upload_receipt(user, receipt(&n.to_string())).unwrap();
        let r = store.get(user).unwrap().unwrap();
        assert!(!(r.is_processing && r.is_completed));
        assert!(r.receipt.is_some());

        machine.complete_stage(user).unwrap();
        let r = store.get(user).unwrap().unwrap();
        assert!(!(r.is_processing && r.is_completed));
        assert!(r.receipt.is_none());
    }
}
