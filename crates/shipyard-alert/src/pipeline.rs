//! Classification workers and pipeline wiring.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use shipyard_cluster::ClusterGateway;
use shipyard_core::config::{AlertConfig, MailConfig};
use shipyard_state::StateStore;

use crate::classify::classify;
use crate::error::{AlertError, AlertResult};
use crate::mail::{AlertEvent, MailTransport, Mailer};
use crate::owner::pod_creator;
use crate::record::LogRecord;
use crate::source::LogSource;

/// Turns log records into alert events for the mailer.
pub struct AlertPipeline {
    gateway: Arc<dyn ClusterGateway>,
    state: StateStore,
    system_namespaces: Vec<String>,
    mail: mpsc::Sender<AlertEvent>,
}

impl AlertPipeline {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        state: StateStore,
        system_namespaces: Vec<String>,
        mail: mpsc::Sender<AlertEvent>,
    ) -> Self {
        Self {
            gateway,
            state,
            system_namespaces,
            mail,
        }
    }

    /// Handle one record. Returns the number of events queued for mail.
    pub async fn process(&self, record: &LogRecord) -> AlertResult<usize> {
        let namespace = record.kubernetes.namespace_name.as_str();
        if self.system_namespaces.iter().any(|ns| ns == namespace) {
            return Ok(0);
        }
        let Some(level) = classify(&record.log) else {
            return Ok(0);
        };

        let pod_name = record.kubernetes.pod_name.as_str();
        let owner_id = pod_creator(self.gateway.as_ref(), &self.state, namespace, pod_name).await?;
        let owner = self
            .state
            .get_user(owner_id)?
            .ok_or_else(|| AlertError::Unresolved(format!("user {owner_id} has no record")))?;

        let mut recipients = vec![owner.clone()];
        // The team creator hears about it too, once.
        match self.state.team_creator_of(&owner) {
            Ok(Some(creator)) if creator.id != owner.id => recipients.push(creator),
            Ok(_) => {}
            Err(e) => warn!(user_id = owner.id, error = %e, "team creator lookup failed"),
        }

        let mut queued = 0;
        for user in recipients {
            let event = AlertEvent {
                user_id: user.id,
                email: user.email,
                pod_name: pod_name.to_string(),
                namespace: namespace.to_string(),
                level,
                log_message: record.log.clone(),
                timestamp: record.timestamp.clone(),
            };
            if self.mail.send(event).await.is_err() {
                warn!("mail queue closed, alert dropped");
                break;
            }
            queued += 1;
        }
        debug!(namespace, pod = pod_name, %level, queued, "alert raised");
        Ok(queued)
    }

    /// Spawn `count` workers sharing one record queue. Workers exit when
    /// the queue closes.
    pub fn spawn_workers(
        self: &Arc<Self>,
        count: usize,
        records: mpsc::Receiver<LogRecord>,
    ) -> Vec<JoinHandle<()>> {
        let records = Arc::new(Mutex::new(records));
        (0..count.max(1))
            .map(|worker| {
                let pipeline = self.clone();
                let records = records.clone();
                tokio::spawn(async move {
                    loop {
                        let next = records.lock().await.recv().await;
                        let Some(record) = next else {
                            break;
                        };
                        if let Err(e) = pipeline.process(&record).await {
                            error!(
                                worker,
                                namespace = %record.kubernetes.namespace_name,
                                pod = %record.kubernetes.pod_name,
                                error = %e,
                                "alert dropped"
                            );
                        }
                    }
                })
            })
            .collect()
    }
}

/// Run the whole alert pipeline until shutdown signal.
///
/// On shutdown the listener stops, queued records are still processed,
/// and queued mail is still delivered before this returns.
pub async fn run(
    config: AlertConfig,
    mail: MailConfig,
    gateway: Arc<dyn ClusterGateway>,
    state: StateStore,
    transport: Arc<dyn MailTransport>,
    shutdown: watch::Receiver<bool>,
) -> AlertResult<()> {
    let source = LogSource::bind(config.listen).await?;

    let (record_tx, record_rx) = mpsc::channel(config.queue_capacity);
    let (mail_tx, mail_rx) = mpsc::channel(config.mail_queue_capacity);

    let mailer = Mailer::new(transport, mail.from, config.failure_pause());
    let mailer = tokio::spawn(async move { mailer.run(mail_rx).await });

    let pipeline = Arc::new(AlertPipeline::new(
        gateway,
        state,
        config.system_namespaces.clone(),
        mail_tx,
    ));
    let workers = pipeline.spawn_workers(config.workers, record_rx);
    // Workers hold the only remaining mail senders.
    drop(pipeline);
    info!(workers = workers.len(), "alert pipeline started");

    source.run(record_tx, shutdown).await;

    for worker in workers {
        let _ = worker.await;
    }
    let _ = mailer.await;
    info!("alert pipeline stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_cluster::{MemoryCluster, ObjectMeta, OwnerReference, Pod, ReplicaSet};
    use shipyard_core::*;

    use crate::record::KubernetesMeta;

    struct Fixture {
        pipeline: AlertPipeline,
        mail: mpsc::Receiver<AlertEvent>,
        state: StateStore,
    }

    async fn fixture() -> Fixture {
        let cluster = Arc::new(MemoryCluster::new());
        let state = StateStore::open_in_memory().unwrap();

        cluster
            .insert_replica_set(ReplicaSet {
                metadata: ObjectMeta {
                    name: "rs-1".into(),
                    namespace: Some("ns".into()),
                    owner_references: vec![OwnerReference::new("Deployment", "dep-1")],
                    ..Default::default()
                },
            })
            .await;
        cluster
            .insert_pod(Pod {
                metadata: ObjectMeta {
                    name: "dep-1-abc".into(),
                    namespace: Some("ns".into()),
                    owner_references: vec![OwnerReference::new("ReplicaSet", "rs-1")],
                    ..Default::default()
                },
                ..Default::default()
            })
            .await;

        let resource = state
            .register_resource(&NewResource {
                user_id: 7,
                repository_id: "repo".into(),
                kind: ResourceKind::Workload,
                blob_url: "k8s/dep-1.yaml".into(),
                file_name: "dep-1.yaml".into(),
            })
            .unwrap();
        state
            .append(&EntryDraft {
                resource_id: resource.id,
                user_id: 7,
                namespace: "ns".into(),
                name: "dep-1".into(),
                labels: "{}".into(),
                operation: OperationKind::Create,
                status: ResourceStatus::Running,
                command: String::new(),
            })
            .unwrap();

        let (tx, rx) = mpsc::channel(16);
        let pipeline = AlertPipeline::new(
            cluster,
            state.clone(),
            vec!["kube-system".into()],
            tx,
        );
        Fixture {
            pipeline,
            mail: rx,
            state,
        }
    }

    fn record(namespace: &str, pod: &str, line: &str) -> LogRecord {
        LogRecord {
            log: line.into(),
            stream: "stderr".into(),
            timestamp: "2024-05-01T12:00:00Z".into(),
            kubernetes: KubernetesMeta {
                pod_name: pod.into(),
                namespace_name: namespace.into(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn owner_and_team_creator_are_alerted() {
        let mut fx = fixture().await;
        fx.state
            .put_team(&TeamRecord {
                id: 3,
                name: "platform".into(),
                creator_id: 1,
            })
            .unwrap();
        fx.state
            .put_user(&UserRecord {
                id: 7,
                email: "dev@example.com".into(),
                team_id: Some(3),
            })
            .unwrap();
        fx.state
            .put_user(&UserRecord {
                id: 1,
                email: "lead@example.com".into(),
                team_id: Some(3),
            })
            .unwrap();

        let queued = fx
            .pipeline
            .process(&record("ns", "dep-1-abc", "panic: nil pointer"))
            .await
            .unwrap();
        assert_eq!(queued, 2);

        let first = fx.mail.recv().await.unwrap();
        assert_eq!(first.email, "dev@example.com");
        assert_eq!(first.level, crate::AlertLevel::Panic);
        let second = fx.mail.recv().await.unwrap();
        assert_eq!(second.email, "lead@example.com");
    }

    #[tokio::test]
    async fn creator_owning_the_pod_gets_one_mail() {
        let mut fx = fixture().await;
        fx.state
            .put_team(&TeamRecord {
                id: 3,
                name: "solo".into(),
                creator_id: 7,
            })
            .unwrap();
        fx.state
            .put_user(&UserRecord {
                id: 7,
                email: "dev@example.com".into(),
                team_id: Some(3),
            })
            .unwrap();

        let queued = fx
            .pipeline
            .process(&record("ns", "dep-1-abc", "ERROR: db down"))
            .await
            .unwrap();
        assert_eq!(queued, 1);
        assert!(fx.mail.try_recv().is_ok());
        assert!(fx.mail.try_recv().is_err());
    }

    #[tokio::test]
    async fn system_and_quiet_records_are_dropped() {
        let mut fx = fixture().await;
        let queued = fx
            .pipeline
            .process(&record("kube-system", "coredns-1", "fatal: boom"))
            .await
            .unwrap();
        assert_eq!(queued, 0);
        let queued = fx
            .pipeline
            .process(&record("ns", "dep-1-abc", "GET /healthz 200"))
            .await
            .unwrap();
        assert_eq!(queued, 0);
        assert!(fx.mail.try_recv().is_err());
    }

    #[tokio::test]
    async fn unresolved_owner_is_an_error() {
        let fx = fixture().await;
        let err = fx
            .pipeline
            .process(&record("ns", "dep-1-abc", "warn: slow"))
            .await
            .unwrap_err();
        // The ledger resolves user 7, but no user record exists.
        assert!(matches!(err, AlertError::Unresolved(_)));
    }

    #[tokio::test]
    async fn workers_drain_queue_until_closed() {
        let fx = fixture().await;
        fx.state
            .put_user(&UserRecord {
                id: 7,
                email: "dev@example.com".into(),
                team_id: None,
            })
            .unwrap();
        let mut mail = fx.mail;
        let pipeline = Arc::new(fx.pipeline);

        let (tx, rx) = mpsc::channel(8);
        let workers = pipeline.spawn_workers(4, rx);
        drop(pipeline);
        for _ in 0..3 {
            tx.send(record("ns", "dep-1-abc", "error: retrying")).await.unwrap();
        }
        drop(tx);
        for worker in workers {
            worker.await.unwrap();
        }

        let mut delivered = 0;
        while mail.recv().await.is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, 3);
    }
}
