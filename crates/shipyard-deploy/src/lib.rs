//! Manifest deployment pipeline.
//!
//! `Deployer::apply` fetches a registered manifest from blob storage,
//! ensures its namespace, decodes it into a typed object through the
//! kind registry, submits it, verifies rollout, and records a `create`
//! ledger entry. `Deployer::delete` removes the live object and records
//! a `delete` entry.

pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod registry;
pub mod scratch;

pub use error::{DeployError, DeployResult};
pub use manifest::ManifestHeader;
pub use pipeline::{ApplyOutcome, DeleteOutcome, Deployer};
pub use registry::{KindRegistry, TypedObject};
pub use scratch::ScratchFile;
