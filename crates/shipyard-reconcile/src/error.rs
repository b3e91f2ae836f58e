use std::time::Duration;

use shipyard_state::StateError;
use shipyard_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("reconcile pass exceeded {0:?}")]
    Timeout(Duration),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
