//! Apply and delete of registered resources.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

use shipyard_cluster::{ClusterGateway, ensure_namespace, probe_status};
use shipyard_core::command::{apply_command, delete_command};
use shipyard_core::config::DeployConfig;
use shipyard_core::*;
use shipyard_state::StateStore;
use shipyard_storage::{BlobStore, object_key};

use crate::error::{DeployError, DeployResult};
use crate::manifest::ManifestHeader;
use crate::registry::{KindRegistry, TypedObject};
use crate::scratch::ScratchFile;

/// Result of a successful apply.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub namespace: String,
    pub name: String,
    pub status: ResourceStatus,
    pub command: String,
    pub entry: LedgerEntry,
}

/// Result of a delete request.
#[derive(Debug, Clone)]
pub enum DeleteOutcome {
    Deleted {
        namespace: String,
        name: String,
        command: String,
        entry: LedgerEntry,
    },
    /// The live object was already gone; nothing was recorded.
    AlreadyStopped { name: String },
}

pub struct Deployer {
    state: StateStore,
    gateway: Arc<dyn ClusterGateway>,
    config: DeployConfig,
    registry: KindRegistry,
}

impl Deployer {
    pub fn new(state: StateStore, gateway: Arc<dyn ClusterGateway>, config: DeployConfig) -> Self {
        Self {
            state,
            gateway,
            config,
            registry: KindRegistry::default(),
        }
    }

    fn resource(&self, resource_id: ResourceId) -> DeployResult<LogicalResource> {
        self.state
            .get_resource(resource_id)?
            .ok_or_else(|| DeployError::NotFound(format!("resource {resource_id}")))
    }

    /// Deploy a registered resource's manifest to the cluster.
    pub async fn apply(&self, resource_id: ResourceId, blobs: &dyn BlobStore) -> DeployResult<ApplyOutcome> {
        let resource = self.resource(resource_id)?;
        let key = object_key(&resource.blob_url)?;
        let manifest = blobs.get(&key).await?;

        // Removed on every exit path from here on.
        let scratch =
            ScratchFile::write(&self.config.work_dir, resource.id, &resource.file_name, &manifest)
                .await?;
        debug!(resource_id, path = %scratch.path().display(), "manifest downloaded");

        let header = ManifestHeader::parse(&manifest)?;
        let namespace = header.namespace.clone();
        // Decoded before any cluster call so a rejected manifest leaves
        // the cluster untouched.
        let mut object = self.registry.decode(&header, &manifest, resource.kind)?;
        object.set_namespace(&namespace);

        ensure_namespace(self.gateway.as_ref(), &namespace).await?;

        let status = match &object {
            TypedObject::Workload(workload) => {
                self.gateway.create_workload(&namespace, workload).await?;
                self.wait_for_rollout(&namespace, &header.name).await?
            }
            TypedObject::Service(service) => {
                self.gateway.create_service(&namespace, service).await?;
                ResourceStatus::Running
            }
        };

        let command = apply_command(scratch.path(), &namespace);
        let entry = self.state.append(&EntryDraft {
            resource_id: resource.id,
            user_id: resource.user_id,
            namespace: namespace.clone(),
            name: header.name.clone(),
            labels: header.labels_json(),
            operation: OperationKind::Create,
            status,
            command: command.clone(),
        })?;

        info!(
            resource_id,
            namespace = %namespace,
            name = %header.name,
            kind = %resource.kind,
            status = %status,
            "resource applied"
        );

        Ok(ApplyOutcome {
            namespace,
            name: header.name,
            status,
            command,
            entry,
        })
    }

    /// Poll the workload until it is running or the rollout deadline
    /// passes, returning the last derived status.
    async fn wait_for_rollout(&self, namespace: &str, name: &str) -> DeployResult<ResourceStatus> {
        let deadline = Instant::now() + self.config.rollout_timeout();
        loop {
            let status =
                probe_status(self.gateway.as_ref(), ResourceKind::Workload, namespace, name).await?;
            let now = Instant::now();
            if status == ResourceStatus::Running || now >= deadline {
                return Ok(status);
            }
            tokio::time::sleep(self.config.rollout_poll().min(deadline - now)).await;
        }
    }

    /// Remove a resource's live object from the cluster.
    pub async fn delete(&self, resource_id: ResourceId) -> DeployResult<DeleteOutcome> {
        let resource = self.resource(resource_id)?;
        let latest = self.state.latest(resource_id)?.ok_or_else(|| {
            DeployError::NotFound(format!("resource {resource_id} has never been deployed"))
        })?;
        let (namespace, name) = (latest.namespace.as_str(), latest.name.as_str());

        let present = match resource.kind {
            ResourceKind::Workload => self.gateway.get_workload(namespace, name).await.map(|_| ()),
            ResourceKind::Service => self.gateway.get_service(namespace, name).await.map(|_| ()),
        };
        match present {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(resource_id, namespace, name, "delete of absent object");
                return Ok(DeleteOutcome::AlreadyStopped {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        match resource.kind {
            ResourceKind::Workload => self.gateway.delete_workload(namespace, name).await?,
            ResourceKind::Service => self.gateway.delete_service(namespace, name).await?,
        }

        let command = delete_command(resource.kind, name, namespace);
        let entry = self.state.append(&EntryDraft::following(
            &latest,
            OperationKind::Delete,
            ResourceStatus::Stopped,
            command.clone(),
        ))?;

        info!(resource_id, namespace, name, kind = %resource.kind, "resource deleted");

        Ok(DeleteOutcome::Deleted {
            namespace: namespace.to_string(),
            name: name.to_string(),
            command,
            entry,
        })
    }
}
