use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("cluster API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("cluster transport error: {0}")]
    Transport(String),

    #[error("cluster request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to decode cluster response: {0}")]
    Decode(String),

    #[error("invalid cluster request: {0}")]
    Invalid(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;
