use shipyard_core::UserId;
use shipyard_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("no blob storage credentials registered for user {0}")]
    NoCredentials(UserId),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    State(#[from] StateError),
}

pub type StorageResult<T> = Result<T, StorageError>;
