//! In-process cluster gateway.
//!
//! Behaves like a small API server: objects are keyed by namespace and
//! name, creating into a missing namespace fails with not-found, and
//! duplicate creates conflict. Used by tests and by `--in-memory-cluster`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{ClusterError, ClusterResult};
use crate::gateway::ClusterGateway;
use crate::objects::*;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct Objects {
    namespaces: BTreeMap<String, Namespace>,
    workloads: BTreeMap<Key, Workload>,
    services: BTreeMap<Key, Service>,
    pods: BTreeMap<Key, Pod>,
    replica_sets: BTreeMap<Key, ReplicaSet>,
    nodes: Vec<Node>,
    /// New workloads report every replica available immediately.
    settle_on_create: bool,
    /// Every call fails with a transport error while set.
    unreachable: bool,
}

pub struct MemoryCluster {
    objects: RwLock<Objects>,
    version: VersionInfo,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// An empty cluster with the `default` namespace and one node.
    pub fn new() -> Self {
        let mut objects = Objects {
            settle_on_create: true,
            ..Default::default()
        };
        objects
            .namespaces
            .insert("default".to_string(), active_namespace("default"));
        let mut node = Node {
            metadata: ObjectMeta::named("memory-node"),
            ..Default::default()
        };
        node.metadata.creation_timestamp = Some(Utc::now());
        node.metadata
            .labels
            .insert("node-role.kubernetes.io/control-plane".to_string(), String::new());
        node.status.conditions.push(NodeCondition {
            condition_type: "Ready".to_string(),
            status: "True".to_string(),
        });
        node.status.addresses.push(NodeAddress {
            address_type: "InternalIP".to_string(),
            address: "127.0.0.1".to_string(),
        });
        node.status.node_info.kubelet_version = "v1.30.0".to_string();
        objects.nodes.push(node);

        Self {
            objects: RwLock::new(objects),
            version: VersionInfo {
                major: "1".to_string(),
                minor: "30".to_string(),
                git_version: "v1.30.0".to_string(),
                platform: "linux/amd64".to_string(),
            },
        }
    }

    /// Whether new workloads start with all replicas available.
    pub async fn set_settle_on_create(&self, settle: bool) {
        self.objects.write().await.settle_on_create = settle;
    }

    /// Make every subsequent call fail with a transport error.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.objects.write().await.unreachable = unreachable;
    }

    pub async fn set_workload_status(&self, namespace: &str, name: &str, status: WorkloadStatus) -> ClusterResult<()> {
        let mut objects = self.objects.write().await;
        let workload = objects
            .workloads
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found("deployments", namespace, name))?;
        workload.status = Some(status);
        Ok(())
    }

    pub async fn insert_pod(&self, pod: Pod) {
        let ns = pod.metadata.namespace_or_default().to_string();
        let name = pod.metadata.name.clone();
        self.objects.write().await.pods.insert((ns, name), pod);
    }

    pub async fn insert_replica_set(&self, replica_set: ReplicaSet) {
        let ns = replica_set.metadata.namespace_or_default().to_string();
        let name = replica_set.metadata.name.clone();
        self.objects
            .write()
            .await
            .replica_sets
            .insert((ns, name), replica_set);
    }

    /// Remove a workload behind the ledger's back, as an operator would.
    pub async fn remove_workload(&self, namespace: &str, name: &str) {
        self.objects.write().await.workloads.remove(&key(namespace, name));
    }

    async fn read(&self) -> ClusterResult<tokio::sync::RwLockReadGuard<'_, Objects>> {
        let objects = self.objects.read().await;
        if objects.unreachable {
            return Err(ClusterError::Transport("memory cluster unreachable".into()));
        }
        Ok(objects)
    }

    async fn write(&self) -> ClusterResult<tokio::sync::RwLockWriteGuard<'_, Objects>> {
        let objects = self.objects.write().await;
        if objects.unreachable {
            return Err(ClusterError::Transport("memory cluster unreachable".into()));
        }
        Ok(objects)
    }
}

fn active_namespace(name: &str) -> Namespace {
    let mut ns = Namespace::new(name);
    ns.metadata.creation_timestamp = Some(Utc::now());
    ns.status = Some(NamespaceStatus {
        phase: Some("Active".to_string()),
    });
    ns
}

fn not_found(resource: &str, namespace: &str, name: &str) -> ClusterError {
    ClusterError::NotFound(format!("{resource} {namespace}/{name}"))
}

fn already_exists(resource: &str, namespace: &str, name: &str) -> ClusterError {
    ClusterError::Api {
        status: 409,
        message: format!("{resource} \"{name}\" already exists in {namespace}"),
    }
}

/// Stamp namespace and creation time the way the API server does.
fn admit(meta: &mut ObjectMeta, namespace: &str) {
    meta.namespace = Some(namespace.to_string());
    if meta.creation_timestamp.is_none() {
        meta.creation_timestamp = Some(Utc::now());
    }
}

#[async_trait]
impl ClusterGateway for MemoryCluster {
    async fn get_namespace(&self, name: &str) -> ClusterResult<Namespace> {
        self.read()
            .await?
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("namespaces {name}")))
    }

    async fn create_namespace(&self, name: &str) -> ClusterResult<Namespace> {
        let mut objects = self.write().await?;
        if objects.namespaces.contains_key(name) {
            return Err(ClusterError::Api {
                status: 409,
                message: format!("namespaces \"{name}\" already exists"),
            });
        }
        let ns = active_namespace(name);
        objects.namespaces.insert(name.to_string(), ns.clone());
        Ok(ns)
    }

    async fn list_namespaces(&self) -> ClusterResult<Vec<Namespace>> {
        Ok(self.read().await?.namespaces.values().cloned().collect())
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> ClusterResult<Workload> {
        self.read()
            .await?
            .workloads
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("deployments", namespace, name))
    }

    async fn create_workload(&self, namespace: &str, workload: &Workload) -> ClusterResult<Workload> {
        let mut objects = self.write().await?;
        if !objects.namespaces.contains_key(namespace) {
            return Err(ClusterError::NotFound(format!("namespaces {namespace}")));
        }
        let name = workload.metadata.name.clone();
        if objects.workloads.contains_key(&key(namespace, &name)) {
            return Err(already_exists("deployments", namespace, &name));
        }
        let mut created = workload.clone();
        admit(&mut created.metadata, namespace);
        created.status = Some(if objects.settle_on_create {
            WorkloadStatus::settled(created.desired_replicas())
        } else {
            WorkloadStatus::default()
        });
        objects
            .workloads
            .insert(key(namespace, &name), created.clone());
        Ok(created)
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.write()
            .await?
            .workloads
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found("deployments", namespace, name))
    }

    async fn list_workloads(&self) -> ClusterResult<Vec<Workload>> {
        Ok(self.read().await?.workloads.values().cloned().collect())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> ClusterResult<Service> {
        self.read()
            .await?
            .services
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("services", namespace, name))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> ClusterResult<Service> {
        let mut objects = self.write().await?;
        if !objects.namespaces.contains_key(namespace) {
            return Err(ClusterError::NotFound(format!("namespaces {namespace}")));
        }
        let name = service.metadata.name.clone();
        if objects.services.contains_key(&key(namespace, &name)) {
            return Err(already_exists("services", namespace, &name));
        }
        let mut created = service.clone();
        admit(&mut created.metadata, namespace);
        if created.spec.service_type.is_none() {
            created.spec.service_type = Some("ClusterIP".to_string());
        }
        if created.spec.cluster_ip.is_none() {
            let octet = objects.services.len() % 250 + 1;
            created.spec.cluster_ip = Some(format!("10.96.0.{octet}"));
        }
        objects.services.insert(key(namespace, &name), created.clone());
        Ok(created)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.write()
            .await?
            .services
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found("services", namespace, name))
    }

    async fn list_services(&self) -> ClusterResult<Vec<Service>> {
        Ok(self.read().await?.services.values().cloned().collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> ClusterResult<Pod> {
        self.read()
            .await?
            .pods
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("pods", namespace, name))
    }

    async fn list_pods(&self) -> ClusterResult<Vec<Pod>> {
        Ok(self.read().await?.pods.values().cloned().collect())
    }

    async fn get_replica_set(&self, namespace: &str, name: &str) -> ClusterResult<ReplicaSet> {
        self.read()
            .await?
            .replica_sets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("replicasets", namespace, name))
    }

    async fn list_nodes(&self) -> ClusterResult<Vec<Node>> {
        Ok(self.read().await?.nodes.clone())
    }

    async fn server_version(&self) -> ClusterResult<VersionInfo> {
        let _objects = self.read().await?;
        Ok(self.version.clone())
    }

    fn endpoint(&self) -> String {
        "memory://cluster".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ensure_namespace;

    fn workload(name: &str, replicas: i32) -> Workload {
        Workload {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
            metadata: ObjectMeta::named(name),
            spec: WorkloadSpec {
                replicas: Some(replicas),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_requires_namespace() {
        let cluster = MemoryCluster::new();
        let err = cluster.create_workload("team-x", &workload("api", 1)).await.unwrap_err();
        assert!(err.is_not_found());

        assert!(ensure_namespace(&cluster, "team-x").await.unwrap());
        assert!(!ensure_namespace(&cluster, "team-x").await.unwrap());
        let created = cluster.create_workload("team-x", &workload("api", 2)).await.unwrap();
        assert_eq!(created.metadata.namespace.as_deref(), Some("team-x"));
        assert_eq!(created.observed().available_replicas, 2);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let cluster = MemoryCluster::new();
        cluster.create_workload("default", &workload("api", 1)).await.unwrap();
        let err = cluster.create_workload("default", &workload("api", 1)).await.unwrap_err();
        assert!(matches!(err, ClusterError::Api { status: 409, .. }));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let cluster = MemoryCluster::new();
        let svc = Service {
            metadata: ObjectMeta::named("svc-a"),
            ..Default::default()
        };
        let created = cluster.create_service("default", &svc).await.unwrap();
        assert_eq!(created.spec.service_type.as_deref(), Some("ClusterIP"));

        cluster.delete_service("default", "svc-a").await.unwrap();
        assert!(cluster.get_service("default", "svc-a").await.unwrap_err().is_not_found());
        assert!(cluster.delete_service("default", "svc-a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn unreachable_cluster_fails_with_transport_error() {
        let cluster = MemoryCluster::new();
        cluster.set_unreachable(true).await;
        let err = cluster.list_namespaces().await.unwrap_err();
        assert!(matches!(err, ClusterError::Transport(_)));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn unsettled_workloads_report_no_replicas() {
        let cluster = MemoryCluster::new();
        cluster.set_settle_on_create(false).await;
        cluster.create_workload("default", &workload("api", 3)).await.unwrap();
        let live = cluster.get_workload("default", "api").await.unwrap();
        assert_eq!(live.observed().available_replicas, 0);

        cluster
            .set_workload_status("default", "api", WorkloadStatus::settled(3))
            .await
            .unwrap();
        let live = cluster.get_workload("default", "api").await.unwrap();
        assert_eq!(live.observed().available_replicas, 3);
    }
}
