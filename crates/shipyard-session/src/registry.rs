//! Per-user registry of open sessions.
//!
//! At most one session is registered per user. Registering a new session
//! closes the one it replaces. A session may only remove its own entry,
//! so teardown of a replaced session never evicts its successor.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, RwLock, mpsc};
use tracing::{debug, info};

use shipyard_core::{Envelope, UserId};
use shipyard_reconcile::SnapshotPush;
use shipyard_storage::BlobStore;

/// Registry entry for one open session.
pub struct SessionHandle {
    pub session_id: u64,
    /// Outbound queue drained by the session's socket writer.
    pub outbound: mpsc::Sender<Envelope>,
    /// Blob store bound at init; `None` when binding failed.
    pub blob: Option<Arc<dyn BlobStore>>,
    /// Wakes the session's read loop when it must close.
    pub closer: Arc<Notify>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<UserId, SessionHandle>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a process-unique session id.
    pub fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register `handle` for `user_id`, closing any session it replaces.
    pub async fn register(&self, user_id: UserId, handle: SessionHandle) {
        let session_id = handle.session_id;
        let previous = self.sessions.write().await.insert(user_id, handle);
        if let Some(old) = previous {
            if old.session_id != session_id {
                let _ = old.outbound.try_send(Envelope::error("session replaced"));
                old.closer.notify_one();
                info!(user_id, old_session = old.session_id, new_session = session_id, "session replaced");
            }
        }
        debug!(user_id, session_id, "session registered");
    }

    /// Remove the entry for `user_id` if it still belongs to `session_id`.
    pub async fn remove(&self, user_id: UserId, session_id: u64) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&user_id) {
            Some(handle) if handle.session_id == session_id => {
                sessions.remove(&user_id);
                debug!(user_id, session_id, "session removed");
                true
            }
            _ => false,
        }
    }

    /// Queue `envelope` on the user's open session without waiting.
    ///
    /// A full queue drops the envelope: a client that stops reading must
    /// not hold up the caller.
    pub async fn send(&self, user_id: UserId, envelope: Envelope) -> bool {
        let sessions = self.sessions.read().await;
        let Some(handle) = sessions.get(&user_id) else {
            return false;
        };
        match handle.outbound.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                debug!(
                    user_id,
                    session_id = handle.session_id,
                    message = %dropped.message,
                    "outbound queue full, envelope dropped"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Blob store bound to the user's open session.
    pub async fn blob_for(&self, user_id: UserId) -> Option<Arc<dyn BlobStore>> {
        self.sessions
            .read()
            .await
            .get(&user_id)
            .and_then(|h| h.blob.clone())
    }

    pub async fn session_id(&self, user_id: UserId) -> Option<u64> {
        self.sessions.read().await.get(&user_id).map(|h| h.session_id)
    }

}

#[async_trait]
impl SnapshotPush for SessionRegistry {
    async fn push(&self, user_id: UserId, envelope: Envelope) -> bool {
        self.send(user_id, envelope).await
    }
}
