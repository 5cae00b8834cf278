//! Identity seam.
//!
//! Authentication (credential checks, JWT verification, token blacklist)
//! happens upstream. Handlers only ask the injected provider who the
//! caller is.

use crate::{
    error::{StageError, StageResult},
    types::UserId,
};

pub trait IdentityProvider: Send + Sync {
    /// The authenticated caller, or `Unauthenticated`.
    fn current_user_id(&self) -> StageResult<UserId>;
}

/// Always answers with one fixed user. Used by the runner and in tests.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    user_id: Option<UserId>,
}

impl StaticIdentity {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self { user_id: Some(user_id.into()) }
    }

    pub fn anonymous() -> Self {
        Self { user_id: None }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> StageResult<UserId> {
        match &self.user_id {
            Some(id) if !id.is_empty() => Ok(id.clone()),
            _ => Err(StageError::Unauthenticated),
        }
    }
}
