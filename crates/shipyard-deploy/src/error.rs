use shipyard_cluster::ClusterError;
use shipyard_core::ResourceKind;
use shipyard_state::StateError;
use shipyard_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to decode manifest: {0}")]
    Decode(String),

    #[error("unsupported manifest kind {kind} ({api_version})")]
    UnsupportedKind { api_version: String, kind: String },

    #[error("manifest declares a {found} but the resource is registered as a {expected}")]
    KindMismatch {
        expected: ResourceKind,
        found: ResourceKind,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("scratch file error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DeployResult<T> = Result<T, DeployError>;
