use std::sync::Arc;

use shipyard_cluster::ClusterGateway;
use shipyard_core::config::ServerConfig;
use shipyard_deploy::Deployer;
use shipyard_reconcile::Reconciler;
use shipyard_state::StateStore;
use shipyard_storage::{BlobBinder, SnapshotCache};

use crate::registry::SessionRegistry;

/// Everything a session or REST handler needs, shared across connections.
pub struct SessionContext {
    pub state: StateStore,
    pub gateway: Arc<dyn ClusterGateway>,
    pub deployer: Arc<Deployer>,
    pub reconciler: Arc<Reconciler>,
    pub cache: Arc<dyn SnapshotCache>,
    pub registry: Arc<SessionRegistry>,
    pub binder: Arc<dyn BlobBinder>,
    pub server: ServerConfig,
}
