//! One live command session.
//!
//! The socket layer feeds each inbound text frame to
//! [`Session::handle_frame`] and stops reading when it returns
//! [`Flow::Close`]. Replies go to the outbound queue, which a single writer
//! task drains onto the socket.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use shipyard_cluster::{ClusterError, derive_service_status, derive_workload_status};
use shipyard_core::*;
use shipyard_deploy::DeleteOutcome;

use crate::commands::Command;
use crate::context::SessionContext;
use crate::error::{CommandError, CommandResult};
use crate::format::{self, LiveDetail, ResourceView};
use crate::frame::{Frame, Step};
use crate::registry::SessionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, waiting for `init`.
    Connecting,
    /// Initialized and registered.
    Ready,
    Closed,
}

/// Whether the read loop should keep going after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct Session {
    ctx: Arc<SessionContext>,
    user_id: UserId,
    session_id: u64,
    state: SessionState,
    outbound: mpsc::Sender<Envelope>,
    closer: Arc<Notify>,
}

impl Session {
    pub fn new(ctx: Arc<SessionContext>, user_id: UserId, outbound: mpsc::Sender<Envelope>) -> Self {
        let session_id = ctx.registry.next_session_id();
        Self {
            ctx,
            user_id,
            session_id,
            state: SessionState::Connecting,
            outbound,
            closer: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Notified when a newer session for the same user replaces this one.
    pub fn closer(&self) -> Arc<Notify> {
        self.closer.clone()
    }

    pub async fn handle_frame(&mut self, text: &str) -> Flow {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(user_id = self.user_id, error = %e, "malformed session frame");
                return Flow::Close;
            }
        };

        match frame.step() {
            Some(Step::Init) => {
                self.init(&frame).await;
                Flow::Continue
            }
            Some(Step::Connected) => {
                if self.state != SessionState::Ready {
                    self.reply(Envelope::error(CommandError::NotInitialized.to_string()))
                        .await;
                    return Flow::Continue;
                }
                self.dispatch(&frame).await;
                Flow::Continue
            }
            Some(Step::Close) => {
                self.reply(Envelope::ok("ws close", json!("ws close success")))
                    .await;
                Flow::Close
            }
            None => {
                debug!(user_id = self.user_id, step = %frame.step, "unknown session step");
                Flow::Close
            }
        }
    }

    async fn init(&mut self, frame: &Frame) {
        let blob = match self.ctx.binder.bind(self.user_id).await {
            Ok(blob) => Some(blob),
            Err(e) => {
                warn!(user_id = self.user_id, error = %e, "blob storage binding failed");
                self.reply(Envelope::error(format!("blob storage unavailable: {e}")))
                    .await;
                None
            }
        };

        self.ctx
            .registry
            .register(
                self.user_id,
                SessionHandle {
                    session_id: self.session_id,
                    outbound: self.outbound.clone(),
                    blob,
                    closer: self.closer.clone(),
                },
            )
            .await;
        self.state = SessionState::Ready;
        info!(user_id = self.user_id, session_id = self.session_id, "session initialized");

        let mut reply = Envelope::command(&frame.command, "connect success");
        reply.message = "connect success".to_string();
        self.reply(reply).await;

        self.reconcile_in_background();
    }

    /// Push fresh state to this user without waiting for the next tick.
    fn reconcile_in_background(&self) {
        let reconciler = self.ctx.reconciler.clone();
        let user_id = self.user_id;
        tokio::spawn(async move {
            if let Err(e) = reconciler.reconcile_user(user_id).await {
                warn!(user_id, error = %e, "out-of-band reconcile failed");
            }
        });
    }

    async fn dispatch(&self, frame: &Frame) {
        let outcome = match Command::parse(&frame.command) {
            Ok(command) => {
                if command.is_mutating() {
                    info!(user_id = self.user_id, ?command, data = ?frame.data, "executing cluster change");
                } else {
                    debug!(user_id = self.user_id, ?command, "executing session command");
                }
                self.execute(command, frame).await
            }
            Err(e) => Err(e),
        };
        let envelope = match outcome {
            Ok((command, result)) => Envelope::command(&command, result),
            Err(e) => {
                warn!(user_id = self.user_id, command = %frame.command, error = %e, "session command failed");
                Envelope::error(e.to_string())
            }
        };
        self.reply(envelope).await;
    }

    /// Run one command, returning the command line to echo and its result.
    async fn execute(&self, command: Command, frame: &Frame) -> CommandResult<(String, String)> {
        let gateway = self.ctx.gateway.as_ref();
        let now = Utc::now();
        let echo = frame.command.trim().to_string();
        let result = match command {
            Command::ListNamespaces => format::namespaces_table(&gateway.list_namespaces().await?, now),
            Command::ListPods => format::pods_table(&gateway.list_pods().await?, now),
            Command::ListServices => format::services_table(&gateway.list_services().await?, now),
            Command::ListDeployments => {
                format::deployments_table(&gateway.list_workloads().await?, now)
            }
            Command::ClusterInfo => {
                format::cluster_info(&gateway.endpoint(), &gateway.server_version().await?)
            }
            Command::ListNodes => format::nodes_table(&gateway.list_nodes().await?, now),
            Command::Apply => return self.apply(frame).await,
            Command::Delete => return self.delete(frame).await,
            Command::Get | Command::Describe => {
                let resource_id = self.target(frame).await?;
                self.inspect(resource_id, command == Command::Describe).await?
            }
        };
        Ok((echo, result))
    }

    /// A registered resource owned by this session's user.
    fn owned(&self, resource_id: ResourceId) -> CommandResult<LogicalResource> {
        match self.ctx.state.get_resource(resource_id)? {
            Some(resource) if resource.user_id == self.user_id => Ok(resource),
            _ => Err(CommandError::NotFound(format!("resource {resource_id}"))),
        }
    }

    async fn apply(&self, frame: &Frame) -> CommandResult<(String, String)> {
        let resource = self.owned(frame.require_resource_id()?)?;
        let blob = self
            .ctx
            .registry
            .blob_for(self.user_id)
            .await
            .ok_or(CommandError::NoBlobStore)?;
        let outcome = self.ctx.deployer.apply(resource.id, blob.as_ref()).await?;
        Ok((
            outcome.command,
            format!(
                "resource {} deployed to namespace {}",
                resource.file_name, outcome.namespace
            ),
        ))
    }

    async fn delete(&self, frame: &Frame) -> CommandResult<(String, String)> {
        let resource = self.owned(frame.require_resource_id()?)?;
        match self.ctx.deployer.delete(resource.id).await? {
            DeleteOutcome::Deleted { name, command, .. } => {
                self.reconcile_in_background();
                Ok((command, format!("resource {name} stopped")))
            }
            DeleteOutcome::AlreadyStopped { name } => Err(CommandError::AlreadyStopped(name)),
        }
    }

    /// Resolve the resource a get/describe frame points at, either by id
    /// or by name within this user's cached snapshot.
    async fn target(&self, frame: &Frame) -> CommandResult<ResourceId> {
        if let Some(resource_id) = frame.resource_id() {
            return Ok(self.owned(resource_id)?.id);
        }

        let (Some(key), Some(name)) = (frame.text("redis_key"), frame.text("resource_name")) else {
            return Err(CommandError::MissingArgument("k8s_resource_id"));
        };
        if key != running_resources_key(self.user_id) {
            return Err(CommandError::Invalid(format!("snapshot key {key} is not yours")));
        }
        let cached = self
            .ctx
            .cache
            .get(key)
            .await?
            .ok_or_else(|| CommandError::NotFound(format!("resource {name}")))?;
        let running: Vec<RunningResource> =
            serde_json::from_str(&cached).map_err(|e| CommandError::Invalid(e.to_string()))?;
        running
            .iter()
            .find(|r| r.resource_name == name)
            .map(|r| r.resource_id)
            .ok_or_else(|| CommandError::NotFound(format!("resource {name}")))
    }

    async fn inspect(&self, resource_id: ResourceId, describe: bool) -> CommandResult<String> {
        let resource = self.owned(resource_id)?;
        let entry = match self.ctx.state.latest(resource_id)? {
            Some(entry) if entry.operation != OperationKind::Delete => entry,
            Some(entry) => return Err(CommandError::NotFound(format!("resource {}", entry.name))),
            None => return Err(CommandError::NotFound(format!("resource {resource_id}"))),
        };

        let gateway = self.ctx.gateway.as_ref();
        let absent = |e: ClusterError| {
            if e.is_not_found() {
                CommandError::NotFound(format!("{} {}", resource.kind, entry.name))
            } else {
                CommandError::Cluster(e)
            }
        };
        let (status, created, detail) = match resource.kind {
            ResourceKind::Workload => {
                let workload = gateway
                    .get_workload(&entry.namespace, &entry.name)
                    .await
                    .map_err(absent)?;
                (
                    derive_workload_status(Some(&workload)),
                    workload.metadata.creation_timestamp,
                    LiveDetail::of_workload(&workload),
                )
            }
            ResourceKind::Service => {
                let service = gateway
                    .get_service(&entry.namespace, &entry.name)
                    .await
                    .map_err(absent)?;
                (
                    derive_service_status(Some(&service)),
                    service.metadata.creation_timestamp,
                    LiveDetail::of_service(&service),
                )
            }
        };

        let view = ResourceView {
            kind: resource.kind,
            entry: &entry,
            status,
            created,
            detail,
        };
        Ok(if describe {
            format::describe(&view)
        } else {
            format::resource_row(&view, Utc::now())
        })
    }

    async fn reply(&self, envelope: Envelope) {
        if self.outbound.send(envelope).await.is_err() {
            debug!(user_id = self.user_id, "outbound queue closed, reply dropped");
        }
    }

    /// Remove this session's registry entry. Safe to call more than once.
    pub async fn teardown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.state == SessionState::Ready {
            self.ctx.registry.remove(self.user_id, self.session_id).await;
        }
        self.state = SessionState::Closed;
        info!(user_id = self.user_id, session_id = self.session_id, "session closed");
    }
}
