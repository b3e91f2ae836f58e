//! Generic manifest header decode.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{DeployError, DeployResult};

/// The fields every manifest shares, read in a single generic decode.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestHeader {
    pub api_version: String,
    pub kind: String,
    /// `metadata.namespace`, `default` when absent.
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHeader {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    metadata: RawMetadata,
}

#[derive(Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

impl ManifestHeader {
    pub fn parse(manifest: &[u8]) -> DeployResult<Self> {
        let raw: RawHeader =
            serde_yaml::from_slice(manifest).map_err(|e| DeployError::Decode(e.to_string()))?;
        let name = raw
            .metadata
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DeployError::Decode("manifest has no metadata.name".into()))?;
        let namespace = raw
            .metadata
            .namespace
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| "default".to_string());
        Ok(Self {
            api_version: raw.api_version,
            kind: raw.kind,
            namespace,
            name,
            labels: raw.metadata.labels.unwrap_or_default(),
        })
    }

    /// Labels serialized for the ledger.
    pub fn labels_json(&self) -> String {
        serde_json::to_string(&self.labels).unwrap_or_else(|_| "{}".to_string())
    }
}
