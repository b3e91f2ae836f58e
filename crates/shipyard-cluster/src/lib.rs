//! Cluster gateway: a thin typed wrapper over the Kubernetes API.
//!
//! Exposes get/list/create/delete for the two managed kinds (workloads
//! and services) plus read-only introspection of namespaces, pods,
//! replica sets, nodes, and the server version. `HttpCluster` talks to
//! an API-server proxy over plain HTTP; `MemoryCluster` is a complete
//! in-process implementation for tests and dry runs.

pub mod client;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod objects;
pub mod status;

pub use error::{ClusterError, ClusterResult};
pub use gateway::{ClusterGateway, ensure_namespace};
pub use client::HttpCluster;
pub use memory::MemoryCluster;
pub use objects::*;
pub use status::{derive_service_status, derive_workload_status, probe_status};
