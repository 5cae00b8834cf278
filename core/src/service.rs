//! Caller-facing operations, transport agnostic.
//!
//! Every operation resolves the caller through the identity provider it is
//! handed, then delegates to the state machine or the withdrawal query.
//! Response bodies are plain serde structs; a transport layer serializes them.

use crate::{
    clock::{Clock, SystemClock},
    config::ServiceConfig,
    error::{StageError, StageResult},
    identity::IdentityProvider,
    state_machine::SubscriptionMachine,
    store::{MemoryStore, SubscriptionStore, WithdrawalStore},
    types::{Amount, Stage, WithdrawalId},
    withdrawal::{WithdrawalQuery, WithdrawalRecord, WithdrawalStatus},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status:        String,
    pub current_stage: Stage,
    pub check_back:    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Advanced,
    AllStagesCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteResponse {
    pub status:        CompletionStatus,
    pub current_stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_stage_amount: Option<Amount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub current_stage: Stage,
    pub is_processing: bool,
    pub is_completed:  bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationResponse {
    pub qualified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalView {
    pub id:         WithdrawalId,
    pub amount:     Amount,
    pub status:     WithdrawalStatus,
    pub created_at: DateTime<Utc>,
}

impl From<WithdrawalRecord> for WithdrawalView {
    fn from(w: WithdrawalRecord) -> Self {
        Self {
            id:         w.id,
            amount:     w.amount,
            status:     w.status,
            created_at: w.created_at,
        }
    }
}

/// Body returned for any rejected or failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error:     String,
    pub code:      String,
    pub retryable: bool,
}

impl From<&StageError> for ErrorResponse {
    fn from(err: &StageError) -> Self {
        Self {
            error:     err.to_string(),
            code:      err.code().to_string(),
            retryable: err.is_retryable(),
        }
    }
}

pub struct AccountService {
    machine:     SubscriptionMachine,
    withdrawals: WithdrawalQuery,
    check_back:  String,
}

impl AccountService {
    pub fn new(machine: SubscriptionMachine, withdrawals: WithdrawalQuery, check_back: String) -> Self {
        Self { machine, withdrawals, check_back }
    }

    /// Build a fully wired service over one backing store.
    pub fn build<S>(config: &ServiceConfig, store: Arc<S>, clock: Arc<dyn Clock>) -> Self
    where
        S: SubscriptionStore + WithdrawalStore + 'static,
    {
        let subscriptions: Arc<dyn SubscriptionStore> = store.clone();
        let withdrawals: Arc<dyn WithdrawalStore> = store;
        Self::new(
            SubscriptionMachine::new(
                subscriptions,
                config.catalog.clone(),
                clock,
                config.lock_timeout(),
            ),
            WithdrawalQuery::new(withdrawals),
            config.check_back_message.clone(),
        )
    }

    /// Service over a fresh in-memory store with test config.
    pub fn build_test() -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = Self::build(
            &ServiceConfig::default_test(),
            Arc::clone(&store),
            Arc::new(SystemClock),
        );
        (service, store)
    }

    pub fn machine(&self) -> &SubscriptionMachine {
        &self.machine
    }

    // ── Subscription ──────────────────────────────────────────────

    pub fn upload_receipt(
        &self,
        caller: &dyn IdentityProvider,
        receipt: Option<Vec<u8>>,
    ) -> StageResult<UploadResponse> {
        let user_id = caller.current_user_id()?;
        let outcome = self.machine.upload_receipt(&user_id, receipt)?;
        Ok(UploadResponse {
            status:        "processing".to_string(),
            current_stage: outcome.stage,
            check_back:    self.check_back.clone(),
        })
    }

    pub fn complete_stage(&self, caller: &dyn IdentityProvider) -> StageResult<CompleteResponse> {
        let user_id = caller.current_user_id()?;
        let outcome = self.machine.complete_stage(&user_id)?;
        let status = if outcome.all_stages_completed() {
            CompletionStatus::AllStagesCompleted
        } else {
            CompletionStatus::Advanced
        };
        Ok(CompleteResponse {
            status,
            current_stage: outcome.stage,
            next_stage_amount: outcome.next_stage_amount,
        })
    }

    pub fn status(&self, caller: &dyn IdentityProvider) -> StageResult<StatusResponse> {
        let user_id = caller.current_user_id()?;
        let status = self.machine.status(&user_id)?;
        Ok(StatusResponse {
            current_stage: status.stage,
            is_processing: status.is_processing,
            is_completed:  status.is_completed,
        })
    }

    pub fn qualification(&self, caller: &dyn IdentityProvider) -> StageResult<QualificationResponse> {
        let user_id = caller.current_user_id()?;
        Ok(QualificationResponse {
            qualified: self.machine.is_qualified(&user_id)?,
        })
    }

    // ── Withdrawals ───────────────────────────────────────────────

    pub fn pending_withdrawals(
        &self,
        caller: &dyn IdentityProvider,
    ) -> StageResult<Vec<WithdrawalView>> {
        let user_id = caller.current_user_id()?;
        Ok(self
            .withdrawals
            .pending_for(&user_id)?
            .into_iter()
            .map(WithdrawalView::from)
            .collect())
    }
}
