use crate::types::Stage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("A receipt for stage {stage} is already being processed")]
    AlreadyProcessing { stage: Stage },

    #[error("All stages are already completed")]
    AllStagesCompleted,

    #[error("No receipt was provided")]
    MissingReceipt,

    #[error("No subscription exists for this user")]
    NoSubscription,

    #[error("Nothing to complete for stage {stage}: upload a receipt first")]
    NothingToComplete { stage: Stage },

    #[error("Store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("Caller is not authenticated")]
    Unauthenticated,

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable { reason: reason.into() }
    }

    /// Transient infrastructure failures are the only retryable errors.
    /// Domain rejections must be corrected by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Stable snake_case code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyProcessing { .. } => "already_processing",
            Self::AllStagesCompleted       => "all_stages_completed",
            Self::MissingReceipt           => "missing_receipt",
            Self::NoSubscription           => "no_subscription",
            Self::NothingToComplete { .. } => "nothing_to_complete",
            Self::StoreUnavailable { .. }  => "store_unavailable",
            Self::Unauthenticated          => "unauthenticated",
            Self::Database(_)              => "database_error",
            Self::Serialization(_)         => "serialization_error",
            Self::Other(_)                 => "internal_error",
        }
    }
}

/// SQLite reports contention as BUSY/LOCKED once the busy timeout
/// has elapsed. Those are transient and surface as StoreUnavailable.
impl From<rusqlite::Error> for StageError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::unavailable(err.to_string())
            }
            _ => Self::Database(err),
        }
    }
}

pub type StageResult<T> = Result<T, StageError>;
