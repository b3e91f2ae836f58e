//! Ownership resolution: from a pod to the user who deployed it.
//!
//! The ledger, not cluster metadata, records who deployed what. A pod is
//! mapped to its controller's name, and the newest ledger entry for that
//! `(namespace, name)` names the owner.

use tracing::{debug, warn};

use shipyard_cluster::{ClusterGateway, Pod};
use shipyard_core::UserId;
use shipyard_state::StateStore;

use crate::error::{AlertError, AlertResult};

/// Name of the controller responsible for `pod`.
///
/// Walks the first owner reference once. A ReplicaSet resolves one hop
/// further to its owning Deployment when it has one. A pod with no owner
/// is its own controller.
pub async fn resolve_controller(gateway: &dyn ClusterGateway, pod: &Pod) -> String {
    let Some(owner) = pod.metadata.owner_references.first() else {
        return pod.metadata.name.clone();
    };
    if owner.kind != "ReplicaSet" {
        return owner.name.clone();
    }

    let namespace = pod.metadata.namespace_or_default();
    match gateway.get_replica_set(namespace, &owner.name).await {
        Ok(replica_set) => match replica_set.metadata.owner_references.first() {
            Some(parent) if parent.kind == "Deployment" => parent.name.clone(),
            _ => owner.name.clone(),
        },
        Err(e) => {
            warn!(namespace, replica_set = %owner.name, error = %e, "replica set lookup failed");
            owner.name.clone()
        }
    }
}

/// User who deployed the controller behind `pod_name`.
pub async fn pod_creator(
    gateway: &dyn ClusterGateway,
    state: &StateStore,
    namespace: &str,
    pod_name: &str,
) -> AlertResult<UserId> {
    let mut pod = gateway.get_pod(namespace, pod_name).await?;
    if pod.metadata.namespace.is_none() {
        pod.metadata.namespace = Some(namespace.to_string());
    }
    let controller = resolve_controller(gateway, &pod).await;
    debug!(namespace, pod = pod_name, controller = %controller, "pod controller resolved");

    state
        .latest_by_namespace_and_name(namespace, &controller)?
        .map(|entry| entry.user_id)
        .ok_or_else(|| AlertError::Unresolved(format!("no ledger entry for {namespace}/{controller}")))
}
