//! Running-resource snapshot cache.
//!
//! The reconcile loop writes each user's serialized running-resource list
//! under `running_resources_key(user_id)` with a fixed time to live.
//! Sessions read it back to answer `get`/`describe` against a snapshot.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::StorageResult;

#[async_trait]
pub trait SnapshotCache: Send + Sync + 'static {
    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> StorageResult<()>;

    /// Read a live value. Expired entries read as absent.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;
}

/// In-process cache; entries expire lazily when read.
#[derive(Debug, Default)]
pub struct MemorySnapshotCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemorySnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotCache for MemorySnapshotCache {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> StorageResult<()> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }
}
