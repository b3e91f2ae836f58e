//! Shared types used across Shipyard crates.
//!
//! The ledger is the only place that knows where a logical resource
//! currently lives. `LogicalResource` deliberately carries no namespace or
//! metadata name; those come from the newest `LedgerEntry`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of an authenticated user.
pub type UserId = u64;

/// Identifier of a registered logical resource.
pub type ResourceId = u64;

/// Identifier of a ledger entry. Strictly increasing in append order.
pub type EntryId = u64;

/// Identifier of a team.
pub type TeamId = u64;

// ── Resource kinds ────────────────────────────────────────────────

/// The managed resource kinds. Anything else is rejected at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Replica-controlled workload (a `Deployment`).
    #[serde(rename = "deployment")]
    Workload,
    /// Network-exposing service.
    #[serde(rename = "service")]
    Service,
}

impl ResourceKind {
    /// Stored name, also the noun used in the equivalent kubectl command.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Workload => "deployment",
            ResourceKind::Service => "service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported resource kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deployment" | "workload" => Ok(ResourceKind::Workload),
            "service" | "svc" => Ok(ResourceKind::Service),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

// ── Status ────────────────────────────────────────────────────────

/// Derived live status of a resource, persisted as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ResourceStatus {
    Running = 1,
    Stopped = 2,
    Restarting = 3,
}

impl ResourceStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            ResourceStatus::Running => "Running",
            ResourceStatus::Stopped => "Stopped",
            ResourceStatus::Restarting => "Restarting",
        }
    }
}

impl From<ResourceStatus> for u8 {
    fn from(status: ResourceStatus) -> u8 {
        status.code()
    }
}

impl TryFrom<u8> for ResourceStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(ResourceStatus::Running),
            2 => Ok(ResourceStatus::Stopped),
            3 => Ok(ResourceStatus::Restarting),
            other => Err(format!("unknown status code {other}")),
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Check,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Check => "check",
            OperationKind::Delete => "delete",
        }
    }
}

// ── Logical resources ─────────────────────────────────────────────

/// A deployable artifact registered by a user.
///
/// Rows are never removed. A redeploy creates a new row with `parent_id`
/// pointing at the old one, and the old row is marked superseded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogicalResource {
    pub id: ResourceId,
    pub user_id: UserId,
    pub repository_id: String,
    pub kind: ResourceKind,
    /// Full blob-storage URL of the manifest.
    pub blob_url: String,
    /// Display file name of the manifest.
    pub file_name: String,
    pub superseded: bool,
    pub superseded_by: Option<ResourceId>,
    pub parent_id: Option<ResourceId>,
    /// Unix timestamp (seconds).
    pub created_at: u64,
    /// Unix timestamp (seconds).
    pub updated_at: u64,
}

/// Fields supplied when a logical resource is first saved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewResource {
    pub user_id: UserId,
    pub repository_id: String,
    pub kind: ResourceKind,
    pub blob_url: String,
    pub file_name: String,
}

// ── Ledger ────────────────────────────────────────────────────────

/// One immutable row of the operation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub resource_id: ResourceId,
    pub user_id: UserId,
    pub namespace: String,
    /// Resolved `metadata.name` of the live object.
    pub name: String,
    /// JSON-serialized `metadata.labels`.
    pub labels: String,
    pub operation: OperationKind,
    pub status: ResourceStatus,
    /// Equivalent kubectl command line, for auditing.
    pub command: String,
    /// Unix timestamp (seconds).
    pub created_at: u64,
}

impl LedgerEntry {
    /// Decode the stored label set. Malformed label text yields an empty map.
    pub fn label_map(&self) -> BTreeMap<String, String> {
        serde_json::from_str(&self.labels).unwrap_or_default()
    }
}

/// A ledger entry that has not been appended yet.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDraft {
    pub resource_id: ResourceId,
    pub user_id: UserId,
    pub namespace: String,
    pub name: String,
    pub labels: String,
    pub operation: OperationKind,
    pub status: ResourceStatus,
    pub command: String,
}

impl EntryDraft {
    /// A follow-up draft that keeps the identity of `entry`.
    pub fn following(entry: &LedgerEntry, operation: OperationKind, status: ResourceStatus, command: String) -> Self {
        Self {
            resource_id: entry.resource_id,
            user_id: entry.user_id,
            namespace: entry.namespace.clone(),
            name: entry.name.clone(),
            labels: entry.labels.clone(),
            operation,
            status,
            command,
        }
    }
}

// ── Directory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub team_id: Option<TeamId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamRecord {
    pub id: TeamId,
    pub name: String,
    pub creator_id: UserId,
}

/// Blob-storage credentials registered for a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlobCredentials {
    pub user_id: UserId,
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub access_key_secret: String,
}

// ── Snapshots ─────────────────────────────────────────────────────

/// A running resource as cached and pushed to the owning user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunningResource {
    pub resource_id: ResourceId,
    pub resource_name: String,
    pub resource_type: ResourceKind,
    pub namespace: String,
    pub user_id: UserId,
}

/// Cache key holding a user's running-resource snapshot.
pub fn running_resources_key(user_id: UserId) -> String {
    format!("k8s:running_resources:{user_id}")
}

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
