//! Manifest blob storage.
//!
//! A `BlobStore` fetches manifest bytes by object key. Stored resource
//! locators are full URLs; `object_key` strips the scheme and endpoint
//! host to recover the key. Each session binds its own store from the
//! user's registered credentials through a `BlobBinder`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use shipyard_core::UserId;
use shipyard_state::StateStore;

use crate::error::{StorageError, StorageResult};

/// Read access to manifest blobs.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Reads an entire object.
    ///
    /// Returns `StorageError::NotFound` if the object doesn't exist.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;
}

/// Object key of a stored blob locator.
///
/// `https://bucket.oss-cn-hangzhou.aliyuncs.com/k8s/api.yaml` yields
/// `k8s/api.yaml`. A locator without a scheme is taken as a key.
pub fn object_key(url: &str) -> StorageResult<String> {
    let url = url.trim();
    let key = match url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
    {
        Some(rest) => match rest.split_once('/') {
            Some((_host, path)) => path,
            None => "",
        },
        None => url.trim_start_matches('/'),
    };
    let key = key.split(['?', '#']).next().unwrap_or_default();
    if key.is_empty() {
        return Err(StorageError::InvalidKey(url.to_string()));
    }
    Ok(key.to_string())
}

/// In-memory blob store for testing.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: &str, data: impl Into<Bytes>) {
        self.objects.write().await.insert(key.to_string(), data.into());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

/// Blob store over a local directory; keys are relative paths.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !contained {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!(key, size = data.len(), "blob read");
                Ok(Bytes::from(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Binds the blob store a user's session reads manifests from.
#[async_trait]
pub trait BlobBinder: Send + Sync + 'static {
    async fn bind(&self, user_id: UserId) -> StorageResult<Arc<dyn BlobStore>>;
}

/// Binds an `FsBlobStore` rooted at `{blob_root}/{bucket}` from the
/// user's registered credentials.
pub struct CredentialBinder {
    state: StateStore,
    blob_root: PathBuf,
}

impl CredentialBinder {
    pub fn new(state: StateStore, blob_root: impl Into<PathBuf>) -> Self {
        Self {
            state,
            blob_root: blob_root.into(),
        }
    }
}

#[async_trait]
impl BlobBinder for CredentialBinder {
    async fn bind(&self, user_id: UserId) -> StorageResult<Arc<dyn BlobStore>> {
        let creds = self
            .state
            .credentials_for(user_id)?
            .ok_or(StorageError::NoCredentials(user_id))?;
        let bucket = Path::new(&creds.bucket);
        if creds.bucket.is_empty() || bucket.components().count() != 1 {
            return Err(StorageError::InvalidKey(creds.bucket));
        }
        debug!(user_id, bucket = %creds.bucket, endpoint = %creds.endpoint, "blob store bound");
        Ok(Arc::new(FsBlobStore::new(self.blob_root.join(bucket))))
    }
}

/// Hands every user the same store.
pub struct SharedBlobBinder {
    store: Arc<dyn BlobStore>,
}

impl SharedBlobBinder {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BlobBinder for SharedBlobBinder {
    async fn bind(&self, _user_id: UserId) -> StorageResult<Arc<dyn BlobStore>> {
        Ok(self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::BlobCredentials;

    #[test]
    fn object_key_strips_endpoint() {
        assert_eq!(
            object_key("https://bucket.oss-cn-hangzhou.aliyuncs.com/k8s/api.yaml").unwrap(),
            "k8s/api.yaml"
        );
        assert_eq!(object_key("http://minio:9000/manifests/svc.yaml?v=2").unwrap(), "manifests/svc.yaml");
        assert_eq!(object_key("/k8s/svc.yaml").unwrap(), "k8s/svc.yaml");
        assert!(object_key("https://bucket.example.com").is_err());
        assert!(object_key("https://bucket.example.com/").is_err());
    }

    #[tokio::test]
    async fn memory_store_get() {
        let store = MemoryBlobStore::new();
        store.put("k8s/api.yaml", "kind: Deployment").await;
        assert_eq!(store.get("k8s/api.yaml").await.unwrap(), Bytes::from("kind: Deployment"));
        assert!(matches!(store.get("missing").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn fs_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("k8s")).unwrap();
        std::fs::write(dir.path().join("k8s/api.yaml"), b"kind: Service").unwrap();
        let store = FsBlobStore::new(dir.path());

        assert_eq!(store.get("k8s/api.yaml").await.unwrap(), Bytes::from("kind: Service"));
        assert!(matches!(store.get("k8s/none.yaml").await, Err(StorageError::NotFound(_))));
        assert!(matches!(store.get("../etc/passwd").await, Err(StorageError::InvalidKey(_))));
        assert!(matches!(store.get("/etc/passwd").await, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn credential_binder_roots_store_at_bucket() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("team-bucket/k8s")).unwrap();
        std::fs::write(dir.path().join("team-bucket/k8s/svc.yaml"), b"kind: Service").unwrap();

        let state = StateStore::open_in_memory().unwrap();
        state
            .put_credentials(&BlobCredentials {
                user_id: 3,
                endpoint: "oss-cn-hangzhou.aliyuncs.com".into(),
                bucket: "team-bucket".into(),
                access_key_id: "id".into(),
                access_key_secret: "secret".into(),
            })
            .unwrap();
        let binder = CredentialBinder::new(state, dir.path());

        let store = binder.bind(3).await.unwrap();
        assert_eq!(store.get("k8s/svc.yaml").await.unwrap(), Bytes::from("kind: Service"));
        assert!(matches!(binder.bind(4).await, Err(StorageError::NoCredentials(4))));
    }
}
