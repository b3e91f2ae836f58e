//! Storage contracts: manifest blobs and the running-resource snapshot cache.

pub mod blob;
pub mod error;
pub mod snapshot;

pub use blob::{
    BlobBinder, BlobStore, CredentialBinder, FsBlobStore, MemoryBlobStore, SharedBlobBinder,
    object_key,
};
pub use error::{StorageError, StorageResult};
pub use snapshot::{MemorySnapshotCache, SnapshotCache};
