use shapesync_core::CoreError;
use shapesync_storage::StorageError;
use thiserror::Error;

use crate::controller::SyncPhase;
use crate::stream::SubscriptionError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("transaction for {table} failed: {source}")]
    Transaction {
        table: String,
        #[source]
        source: StorageError,
    },

    #[error("subscription for {table} failed: {source}")]
    Subscription {
        table: String,
        #[source]
        source: SubscriptionError,
    },

    #[error("invalid sync config: {0}")]
    Config(String),

    #[error("{table} stopped before catching up ({phase:?})")]
    NotUpToDate { table: String, phase: SyncPhase },

    #[error("sync task for {table} aborted: {reason}")]
    TaskAborted { table: String, reason: String },
}

impl EngineError {
    /// The malformed-event case: an operation tag the core does not understand.
    pub fn is_unknown_operation(&self) -> bool {
        matches!(self, Self::Core(CoreError::UnknownOperation(_)))
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Transaction {
                source: StorageError::ConstraintViolation(_),
                ..
            }
        )
    }
}
