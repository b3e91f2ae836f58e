use shipyard_cluster::ClusterError;
use shipyard_state::StateError;

pub type AlertResult<T> = Result<T, AlertError>;

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("cluster: {0}")]
    Cluster(#[from] ClusterError),

    #[error("state: {0}")]
    State(#[from] StateError),

    /// No ledger entry or user record explains who owns the pod.
    #[error("unresolved owner: {0}")]
    Unresolved(String),

    #[error("mail transport: {0}")]
    Transport(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
