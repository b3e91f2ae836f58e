use shipyard_cluster::ClusterError;
use shipyard_deploy::DeployError;
use shipyard_state::StateError;
use shipyard_storage::StorageError;

/// Failure of a single session command. Always reported to the client
/// as an error envelope; never fatal to the session.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unsupported command: {0}")]
    Unsupported(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} is already stopped")]
    AlreadyStopped(String),

    #[error("blob storage is not bound for this session")]
    NoBlobStore,

    #[error("session is not initialized")]
    NotInitialized,

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error("cluster: {0}")]
    Cluster(#[from] ClusterError),

    #[error("state: {0}")]
    State(#[from] StateError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid argument: {0}")]
    Invalid(String),
}

pub type CommandResult<T> = std::result::Result<T, CommandError>;
