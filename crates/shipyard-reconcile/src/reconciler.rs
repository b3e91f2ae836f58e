use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use shipyard_cluster::{ClusterGateway, probe_status};
use shipyard_core::command::get_command;
use shipyard_core::config::{ReconcileConfig, StorageConfig};
use shipyard_core::*;
use shipyard_state::StateStore;
use shipyard_storage::SnapshotCache;

use crate::error::{ReconcileError, ReconcileResult};

/// Delivery of unsolicited messages to a user's open session.
#[async_trait]
pub trait SnapshotPush: Send + Sync + 'static {
    /// Returns `false` when the user has no open session.
    async fn push(&self, user_id: UserId, envelope: Envelope) -> bool;
}

/// Counters for one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Resources that received a `check` entry.
    pub checked: usize,
    /// Resources never deployed, deleted, or unreachable this pass.
    pub skipped: usize,
    /// Users a snapshot was written for.
    pub snapshots: usize,
    /// Snapshots delivered to an open session.
    pub delivered: usize,
}

pub struct Reconciler {
    state: StateStore,
    gateway: Arc<dyn ClusterGateway>,
    cache: Arc<dyn SnapshotCache>,
    push: Arc<dyn SnapshotPush>,
    config: ReconcileConfig,
    snapshot_ttl: std::time::Duration,
    /// Held for the duration of a pass; passes never overlap.
    tick_guard: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        state: StateStore,
        gateway: Arc<dyn ClusterGateway>,
        cache: Arc<dyn SnapshotCache>,
        push: Arc<dyn SnapshotPush>,
        config: ReconcileConfig,
        storage: &StorageConfig,
    ) -> Self {
        Self {
            state,
            gateway,
            cache,
            push,
            config,
            snapshot_ttl: storage.snapshot_ttl(),
            tick_guard: Mutex::new(()),
        }
    }

    /// Run the periodic loop until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.interval();
        info!(interval_secs = period.as_secs(), "reconciler started");

        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(Some(report)) => debug!(?report, "reconcile tick complete"),
                        Ok(None) => {}
                        Err(e) => error!(error = %e, "reconcile tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("reconciler shutting down");
                    break;
                }
            }
        }
    }

    /// One periodic pass over every resource.
    ///
    /// Returns `None` without doing anything when another pass holds the
    /// guard.
    pub async fn tick(&self) -> ReconcileResult<Option<ReconcileReport>> {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            warn!("previous reconcile pass still running, skipping tick");
            return Ok(None);
        };
        self.bounded_pass(None).await.map(Some)
    }

    /// Out-of-band pass restricted to one user's resources.
    ///
    /// Waits for any running pass to finish first. The user always
    /// receives a snapshot, even an empty one.
    pub async fn reconcile_user(&self, user_id: UserId) -> ReconcileResult<ReconcileReport> {
        let _guard = self.tick_guard.lock().await;
        self.bounded_pass(Some(user_id)).await
    }

    async fn bounded_pass(&self, user: Option<UserId>) -> ReconcileResult<ReconcileReport> {
        let limit = self.config.tick_timeout();
        tokio::time::timeout(limit, self.pass(user))
            .await
            .map_err(|_| ReconcileError::Timeout(limit))?
    }

    async fn pass(&self, user: Option<UserId>) -> ReconcileResult<ReconcileReport> {
        let resources = match user {
            Some(user_id) => self.state.list_resources_for_user(user_id)?,
            None => self.state.list_resources()?,
        };

        let mut report = ReconcileReport::default();
        // Every user touched by the pass gets a snapshot, possibly empty.
        let mut running: BTreeMap<UserId, Vec<RunningResource>> = BTreeMap::new();
        if let Some(user_id) = user {
            running.insert(user_id, Vec::new());
        }

        for resource in &resources {
            running.entry(resource.user_id).or_default();

            let latest = match self.state.latest(resource.id)? {
                Some(entry) if entry.operation != OperationKind::Delete => entry,
                _ => {
                    report.skipped += 1;
                    continue;
                }
            };

            let status = match probe_status(
                self.gateway.as_ref(),
                resource.kind,
                &latest.namespace,
                &latest.name,
            )
            .await
            {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        resource_id = resource.id,
                        namespace = %latest.namespace,
                        name = %latest.name,
                        error = %e,
                        "status check failed, skipping resource"
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            self.state.append(&EntryDraft::following(
                &latest,
                OperationKind::Check,
                status,
                get_command(resource.kind, &latest.name, &latest.namespace),
            ))?;
            report.checked += 1;

            if status == ResourceStatus::Running {
                running
                    .entry(resource.user_id)
                    .or_default()
                    .push(RunningResource {
                        resource_id: resource.id,
                        resource_name: latest.name.clone(),
                        resource_type: resource.kind,
                        namespace: latest.namespace.clone(),
                        user_id: resource.user_id,
                    });
            }
        }

        for (user_id, resources) in running {
            if self.publish(user_id, resources).await? {
                report.delivered += 1;
            }
            report.snapshots += 1;
        }

        debug!(
            checked = report.checked,
            skipped = report.skipped,
            snapshots = report.snapshots,
            delivered = report.delivered,
            "reconcile pass finished"
        );
        Ok(report)
    }

    /// Cache a user's snapshot and push it to their session.
    async fn publish(&self, user_id: UserId, resources: Vec<RunningResource>) -> ReconcileResult<bool> {
        let key = running_resources_key(user_id);
        let serialized = serde_json::to_string(&resources)?;
        self.cache.set(&key, serialized, self.snapshot_ttl).await?;

        let envelope = Envelope::ok(
            "resource_status_running",
            json!({
                "type": "resource_status",
                "redis_key": key,
                "resources": resources,
                "timestamp": epoch_secs(),
            }),
        );
        Ok(self.push.push(user_id, envelope).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_cluster::{MemoryCluster, ObjectMeta, Service, Workload, WorkloadSpec};
    use shipyard_state::Page;
    use shipyard_storage::MemorySnapshotCache;

    #[derive(Default)]
    struct RecordingPush {
        online: std::sync::Mutex<Vec<UserId>>,
        sent: std::sync::Mutex<Vec<(UserId, Envelope)>>,
    }

    #[async_trait]
    impl SnapshotPush for RecordingPush {
        async fn push(&self, user_id: UserId, envelope: Envelope) -> bool {
            if !self.online.lock().unwrap().contains(&user_id) {
                return false;
            }
            self.sent.lock().unwrap().push((user_id, envelope));
            true
        }
    }

    struct Fixture {
        state: StateStore,
        cluster: Arc<MemoryCluster>,
        cache: Arc<MemorySnapshotCache>,
        push: Arc<RecordingPush>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let state = StateStore::open_in_memory().unwrap();
        let cluster = Arc::new(MemoryCluster::new());
        let cache = Arc::new(MemorySnapshotCache::new());
        let push = Arc::new(RecordingPush::default());
        let reconciler = Reconciler::new(
            state.clone(),
            cluster.clone(),
            cache.clone(),
            push.clone(),
            ReconcileConfig::default(),
            &StorageConfig::default(),
        );
        Fixture {
            state,
            cluster,
            cache,
            push,
            reconciler,
        }
    }

    impl Fixture {
        /// Register a resource and record it as created at `(default, name)`.
        fn deployed(&self, user_id: UserId, kind: ResourceKind, name: &str) -> ResourceId {
            let resource = self
                .state
                .register_resource(&NewResource {
                    user_id,
                    repository_id: "repo".into(),
                    kind,
                    blob_url: format!("https://b.example.com/k8s/{name}.yaml"),
                    file_name: format!("{name}.yaml"),
                })
                .unwrap();
            self.state
                .append(&EntryDraft {
                    resource_id: resource.id,
                    user_id,
                    namespace: "default".into(),
                    name: name.into(),
                    labels: "{}".into(),
                    operation: OperationKind::Create,
                    status: ResourceStatus::Running,
                    command: format!("kubectl apply -f k8s/{name}.yaml -n default"),
                })
                .unwrap();
            resource.id
        }

        async fn live_workload(&self, name: &str) {
            let workload = Workload {
                metadata: ObjectMeta::named(name),
                spec: WorkloadSpec {
                    replicas: Some(1),
                    ..Default::default()
                },
                ..Default::default()
            };
            self.cluster.create_workload("default", &workload).await.unwrap();
        }

        async fn live_service(&self, name: &str) {
            let service = Service {
                metadata: ObjectMeta::named(name),
                ..Default::default()
            };
            self.cluster.create_service("default", &service).await.unwrap();
        }
    }

    #[tokio::test]
    async fn tick_appends_check_entries() {
        let fx = fixture();
        let api = fx.deployed(1, ResourceKind::Workload, "api");
        let gone = fx.deployed(1, ResourceKind::Service, "gone");
        fx.live_workload("api").await;

        let report = fx.reconciler.tick().await.unwrap().unwrap();
        assert_eq!(report.checked, 2);

        let latest = fx.state.latest(api).unwrap().unwrap();
        assert_eq!(latest.operation, OperationKind::Check);
        assert_eq!(latest.status, ResourceStatus::Running);
        assert_eq!(latest.command, "kubectl get deployment api -n default");

        let latest = fx.state.latest(gone).unwrap().unwrap();
        assert_eq!(latest.operation, OperationKind::Check);
        assert_eq!(latest.status, ResourceStatus::Stopped);
    }

    #[tokio::test]
    async fn repeated_ticks_are_content_stable() {
        let fx = fixture();
        let svc = fx.deployed(2, ResourceKind::Service, "svc-a");
        fx.live_service("svc-a").await;

        fx.reconciler.tick().await.unwrap();
        fx.reconciler.tick().await.unwrap();

        let history = fx.state.history(svc, Page::default()).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].operation, OperationKind::Check);
        assert_eq!(history[1].operation, OperationKind::Check);
        assert_eq!(history[0].status, history[1].status);
    }

    #[tokio::test]
    async fn deleted_resources_are_skipped_and_pass_continues() {
        let fx = fixture();
        let deleted = fx.deployed(3, ResourceKind::Service, "old");
        let latest = fx.state.latest(deleted).unwrap().unwrap();
        fx.state
            .append(&EntryDraft::following(
                &latest,
                OperationKind::Delete,
                ResourceStatus::Stopped,
                "kubectl delete service old -n default".into(),
            ))
            .unwrap();
        let live = fx.deployed(3, ResourceKind::Service, "new");
        fx.live_service("new").await;

        let report = fx.reconciler.tick().await.unwrap().unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            fx.state.latest(deleted).unwrap().unwrap().operation,
            OperationKind::Delete
        );
        assert_eq!(fx.state.latest(live).unwrap().unwrap().operation, OperationKind::Check);
    }

    #[tokio::test]
    async fn snapshot_is_cached_and_pushed_to_online_users() {
        let fx = fixture();
        fx.deployed(1, ResourceKind::Workload, "api");
        fx.deployed(2, ResourceKind::Service, "svc-b");
        fx.live_workload("api").await;
        fx.live_service("svc-b").await;
        fx.push.online.lock().unwrap().push(1);

        let report = fx.reconciler.tick().await.unwrap().unwrap();
        assert_eq!(report.snapshots, 2);
        assert_eq!(report.delivered, 1);

        let cached = fx.cache.get(&running_resources_key(2)).await.unwrap().unwrap();
        let resources: Vec<RunningResource> = serde_json::from_str(&cached).unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].resource_name, "svc-b");

        let sent = fx.push.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (user, envelope) = &sent[0];
        assert_eq!(*user, 1);
        assert!(envelope.success);
        assert_eq!(envelope.message, "resource_status_running");
        let data = envelope.data.as_ref().unwrap();
        assert_eq!(data["type"], "resource_status");
        assert_eq!(data["redis_key"], "k8s:running_resources:1");
        assert_eq!(data["resources"][0]["resource_name"], "api");
        assert_eq!(data["resources"][0]["resource_type"], "deployment");
    }

    #[tokio::test]
    async fn user_with_nothing_running_gets_empty_snapshot() {
        let fx = fixture();
        fx.deployed(4, ResourceKind::Workload, "down");
        fx.push.online.lock().unwrap().push(4);

        fx.reconciler.tick().await.unwrap();

        let cached = fx.cache.get(&running_resources_key(4)).await.unwrap().unwrap();
        assert_eq!(cached, "[]");
        let sent = fx.push.sent.lock().unwrap();
        assert_eq!(sent[0].1.data.as_ref().unwrap()["resources"], json!([]));
    }

    #[tokio::test]
    async fn unreachable_cluster_records_nothing() {
        let fx = fixture();
        let api = fx.deployed(1, ResourceKind::Workload, "api");
        fx.cluster.set_unreachable(true).await;

        let report = fx.reconciler.tick().await.unwrap().unwrap();
        assert_eq!(report.checked, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(fx.state.latest(api).unwrap().unwrap().operation, OperationKind::Create);
    }

    #[tokio::test]
    async fn busy_tick_is_skipped() {
        let fx = fixture();
        let api = fx.deployed(1, ResourceKind::Workload, "api");

        let guard = fx.reconciler.tick_guard.lock().await;
        assert!(fx.reconciler.tick().await.unwrap().is_none());
        drop(guard);

        assert_eq!(fx.state.latest(api).unwrap().unwrap().operation, OperationKind::Create);
        assert!(fx.reconciler.tick().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reconcile_user_touches_only_that_user() {
        let fx = fixture();
        let mine = fx.deployed(1, ResourceKind::Workload, "mine");
        let theirs = fx.deployed(2, ResourceKind::Workload, "theirs");
        fx.push.online.lock().unwrap().extend([1, 2]);

        let report = fx.reconciler.reconcile_user(1).await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.snapshots, 1);
        assert_eq!(fx.state.latest(mine).unwrap().unwrap().operation, OperationKind::Check);
        assert_eq!(fx.state.latest(theirs).unwrap().unwrap().operation, OperationKind::Create);

        // A user with no resources still gets an (empty) snapshot.
        let report = fx.reconciler.reconcile_user(9).await.unwrap();
        assert_eq!(report.snapshots, 1);
        assert!(fx.cache.get(&running_resources_key(9)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let fx = fixture();
        let reconciler = Arc::new(fx.reconciler);
        let (tx, rx) = watch::channel(false);

        let handle = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.run(rx).await })
        };
        tx.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("reconciler should stop")
            .unwrap();
    }
}
