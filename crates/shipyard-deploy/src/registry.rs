//! Kind registry: maps manifest `(apiVersion, kind)` to a managed kind
//! and decodes the manifest into its typed object.

use shipyard_cluster::{Service, Workload};
use shipyard_core::ResourceKind;

use crate::error::{DeployError, DeployResult};
use crate::manifest::ManifestHeader;

/// A decoded manifest ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedObject {
    Workload(Workload),
    Service(Service),
}

impl TypedObject {
    pub fn kind(&self) -> ResourceKind {
        match self {
            TypedObject::Workload(_) => ResourceKind::Workload,
            TypedObject::Service(_) => ResourceKind::Service,
        }
    }

    /// Force the object into `namespace`.
    pub fn set_namespace(&mut self, namespace: &str) {
        let meta = match self {
            TypedObject::Workload(w) => &mut w.metadata,
            TypedObject::Service(s) => &mut s.metadata,
        };
        meta.namespace = Some(namespace.to_string());
    }
}

pub struct KindRegistry {
    entries: Vec<(&'static str, &'static str, ResourceKind)>,
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self {
            entries: vec![
                ("apps/v1", "Deployment", ResourceKind::Workload),
                ("v1", "Service", ResourceKind::Service),
            ],
        }
    }
}

impl KindRegistry {
    pub fn resolve(&self, api_version: &str, kind: &str) -> Option<ResourceKind> {
        self.entries
            .iter()
            .find(|(v, k, _)| *v == api_version && *k == kind)
            .map(|(_, _, managed)| *managed)
    }

    /// Decode `manifest` as the object its header declares, which must
    /// match the kind the resource was registered with.
    pub fn decode(
        &self,
        header: &ManifestHeader,
        manifest: &[u8],
        expected: ResourceKind,
    ) -> DeployResult<TypedObject> {
        let found = self
            .resolve(&header.api_version, &header.kind)
            .ok_or_else(|| DeployError::UnsupportedKind {
                api_version: header.api_version.clone(),
                kind: header.kind.clone(),
            })?;
        if found != expected {
            return Err(DeployError::KindMismatch { expected, found });
        }
        let decode_err = |e: serde_yaml::Error| DeployError::Decode(e.to_string());
        Ok(match found {
            ResourceKind::Workload => {
                TypedObject::Workload(serde_yaml::from_slice(manifest).map_err(decode_err)?)
            }
            ResourceKind::Service => {
                TypedObject::Service(serde_yaml::from_slice(manifest).map_err(decode_err)?)
            }
        })
    }
}
