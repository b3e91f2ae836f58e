//! The cluster gateway contract.

use async_trait::async_trait;
use tracing::info;

use crate::error::ClusterResult;
use crate::objects::*;

/// Typed access to the cluster API.
///
/// Implementations are shared across sessions, the reconcile loop, and
/// the alert workers, so they must be safe to call concurrently.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn get_namespace(&self, name: &str) -> ClusterResult<Namespace>;
    async fn create_namespace(&self, name: &str) -> ClusterResult<Namespace>;
    async fn list_namespaces(&self) -> ClusterResult<Vec<Namespace>>;

    async fn get_workload(&self, namespace: &str, name: &str) -> ClusterResult<Workload>;
    async fn create_workload(&self, namespace: &str, workload: &Workload) -> ClusterResult<Workload>;
    async fn delete_workload(&self, namespace: &str, name: &str) -> ClusterResult<()>;
    /// Workloads across all namespaces.
    async fn list_workloads(&self) -> ClusterResult<Vec<Workload>>;

    async fn get_service(&self, namespace: &str, name: &str) -> ClusterResult<Service>;
    async fn create_service(&self, namespace: &str, service: &Service) -> ClusterResult<Service>;
    async fn delete_service(&self, namespace: &str, name: &str) -> ClusterResult<()>;
    /// Services across all namespaces.
    async fn list_services(&self) -> ClusterResult<Vec<Service>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> ClusterResult<Pod>;
    /// Pods across all namespaces.
    async fn list_pods(&self) -> ClusterResult<Vec<Pod>>;

    async fn get_replica_set(&self, namespace: &str, name: &str) -> ClusterResult<ReplicaSet>;

    async fn list_nodes(&self) -> ClusterResult<Vec<Node>>;
    async fn server_version(&self) -> ClusterResult<VersionInfo>;

    /// Address of the API server, for display.
    fn endpoint(&self) -> String;
}

/// Make sure `namespace` exists, creating it when the gateway reports
/// not-found. Returns `true` when the namespace was created.
pub async fn ensure_namespace(gateway: &dyn ClusterGateway, namespace: &str) -> ClusterResult<bool> {
    match gateway.get_namespace(namespace).await {
        Ok(_) => Ok(false),
        Err(e) if e.is_not_found() => {
            gateway.create_namespace(namespace).await?;
            info!(namespace, "namespace created");
            Ok(true)
        }
        Err(e) => Err(e),
    }
}
