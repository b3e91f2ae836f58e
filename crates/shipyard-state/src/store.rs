//! StateStore — redb-backed persistence for the resource ledger.
//!
//! Provides the repository contract for logical resources and directory
//! records, and the append-only ledger. Ledger entries are never updated
//! or removed; logical resources are never removed. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use shipyard_core::*;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// A window over newest-first history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        txn.open_table(LEDGER).map_err(map_err!(Table))?;
        txn.open_table(LEDGER_BY_RESOURCE).map_err(map_err!(Table))?;
        txn.open_table(LEDGER_BY_NAME).map_err(map_err!(Table))?;
        txn.open_table(USERS).map_err(map_err!(Table))?;
        txn.open_table(TEAMS).map_err(map_err!(Table))?;
        txn.open_table(CREDENTIALS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Logical resources ──────────────────────────────────────────

    /// First save of a logical resource. Assigns the next id.
    pub fn register_resource(&self, new: &NewResource) -> StateResult<LogicalResource> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let resource;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            let id = match table.last().map_err(map_err!(Read))? {
                Some((key, _)) => key.value() + 1,
                None => 1,
            };
            resource = LogicalResource {
                id,
                user_id: new.user_id,
                repository_id: new.repository_id.clone(),
                kind: new.kind,
                blob_url: new.blob_url.clone(),
                file_name: new.file_name.clone(),
                superseded: false,
                superseded_by: None,
                parent_id: None,
                created_at: now,
                updated_at: now,
            };
            table
                .insert(id, encode(&resource)?.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(resource_id = resource.id, kind = %resource.kind, "resource registered");
        Ok(resource)
    }

    /// Redeploy a resource from a new manifest.
    ///
    /// Creates a new row linked to `old_id` and marks the old row
    /// superseded. Only the head of a redeploy chain can be redeployed.
    pub fn redeploy_resource(
        &self,
        old_id: ResourceId,
        blob_url: &str,
        file_name: &str,
    ) -> StateResult<LogicalResource> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let successor;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            let mut old: LogicalResource = match table.get(old_id).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::NotFound(format!("resource {old_id}"))),
            };
            if old.superseded {
                return Err(StateError::Conflict(format!(
                    "resource {old_id} was already superseded by {:?}",
                    old.superseded_by
                )));
            }
            let id = match table.last().map_err(map_err!(Read))? {
                Some((key, _)) => key.value() + 1,
                None => 1,
            };
            successor = LogicalResource {
                id,
                user_id: old.user_id,
                repository_id: old.repository_id.clone(),
                kind: old.kind,
                blob_url: blob_url.to_string(),
                file_name: file_name.to_string(),
                superseded: false,
                superseded_by: None,
                parent_id: Some(old_id),
                created_at: now,
                updated_at: now,
            };
            old.superseded = true;
            old.superseded_by = Some(id);
            old.updated_at = now;
            table
                .insert(old_id, encode(&old)?.as_slice())
                .map_err(map_err!(Write))?;
            table
                .insert(id, encode(&successor)?.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(old_id, new_id = successor.id, "resource redeployed");
        Ok(successor)
    }

    /// Get a logical resource by id.
    pub fn get_resource(&self, id: ResourceId) -> StateResult<Option<LogicalResource>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Get a logical resource by id, failing with `NotFound` when absent.
    pub fn require_resource(&self, id: ResourceId) -> StateResult<LogicalResource> {
        self.get_resource(id)?
            .ok_or_else(|| StateError::NotFound(format!("resource {id}")))
    }

    /// List every logical resource, superseded rows included, in id order.
    pub fn list_resources(&self) -> StateResult<Vec<LogicalResource>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Current (non-superseded) resources of a repository, optionally of one kind.
    pub fn list_resources_by_repository(
        &self,
        repository_id: &str,
        kind: Option<ResourceKind>,
    ) -> StateResult<Vec<LogicalResource>> {
        Ok(self
            .list_resources()?
            .into_iter()
            .filter(|r| !r.superseded && r.repository_id == repository_id)
            .filter(|r| kind.is_none_or(|k| r.kind == k))
            .collect())
    }

    /// Every resource owned by a user, superseded rows included.
    pub fn list_resources_for_user(&self, user_id: UserId) -> StateResult<Vec<LogicalResource>> {
        Ok(self
            .list_resources()?
            .into_iter()
            .filter(|r| r.user_id == user_id)
            .collect())
    }

    // ── Ledger ─────────────────────────────────────────────────────

    /// Append an entry. Returns the stored entry with its id and timestamp.
    pub fn append(&self, draft: &EntryDraft) -> StateResult<LedgerEntry> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let entry;
        {
            let mut ledger = txn.open_table(LEDGER).map_err(map_err!(Table))?;
            let id = match ledger.last().map_err(map_err!(Read))? {
                Some((key, _)) => key.value() + 1,
                None => 1,
            };
            entry = LedgerEntry {
                id,
                resource_id: draft.resource_id,
                user_id: draft.user_id,
                namespace: draft.namespace.clone(),
                name: draft.name.clone(),
                labels: draft.labels.clone(),
                operation: draft.operation,
                status: draft.status,
                command: draft.command.clone(),
                created_at: epoch_secs(),
            };
            ledger
                .insert(id, encode(&entry)?.as_slice())
                .map_err(map_err!(Write))?;

            let mut by_resource = txn.open_table(LEDGER_BY_RESOURCE).map_err(map_err!(Table))?;
            by_resource
                .insert((entry.resource_id, id), ())
                .map_err(map_err!(Write))?;

            let mut by_name = txn.open_table(LEDGER_BY_NAME).map_err(map_err!(Table))?;
            let key = name_key(&entry.namespace, &entry.name);
            by_name.insert(key.as_str(), id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            entry_id = entry.id,
            resource_id = entry.resource_id,
            operation = entry.operation.as_str(),
            status = %entry.status,
            "ledger entry appended"
        );
        Ok(entry)
    }

    /// Get a ledger entry by id.
    pub fn get_entry(&self, id: EntryId) -> StateResult<Option<LedgerEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEDGER).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Newest entry for a resource, of any operation kind.
    pub fn latest(&self, resource_id: ResourceId) -> StateResult<Option<LedgerEntry>> {
        let entry_id = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let index = txn.open_table(LEDGER_BY_RESOURCE).map_err(map_err!(Table))?;
            let mut range = index
                .range((resource_id, 0)..=(resource_id, u64::MAX))
                .map_err(map_err!(Read))?;
            match range.next_back() {
                Some(item) => {
                    let (key, _) = item.map_err(map_err!(Read))?;
                    key.value().1
                }
                None => return Ok(None),
            }
        };
        self.get_entry(entry_id)
    }

    /// Newest entry whose operation is not `delete`.
    ///
    /// This is where a resource currently lives (or last lived).
    pub fn latest_placement(&self, resource_id: ResourceId) -> StateResult<Option<LedgerEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(LEDGER_BY_RESOURCE).map_err(map_err!(Table))?;
        let ledger = txn.open_table(LEDGER).map_err(map_err!(Table))?;
        let range = index
            .range((resource_id, 0)..=(resource_id, u64::MAX))
            .map_err(map_err!(Read))?;
        for item in range.rev() {
            let (key, _) = item.map_err(map_err!(Read))?;
            let entry_id = key.value().1;
            if let Some(guard) = ledger.get(entry_id).map_err(map_err!(Read))? {
                let entry: LedgerEntry = decode(guard.value())?;
                if entry.operation != OperationKind::Delete {
                    return Ok(Some(entry));
                }
            }
        }
        Ok(None)
    }

    /// Newest entry recorded under `(namespace, name)`, across all resources.
    ///
    /// When two logical resources resolve to the same pair, the more
    /// recent entry wins.
    pub fn latest_by_namespace_and_name(
        &self,
        namespace: &str,
        name: &str,
    ) -> StateResult<Option<LedgerEntry>> {
        let key = name_key(namespace, name);
        let entry_id = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let index = txn.open_table(LEDGER_BY_NAME).map_err(map_err!(Table))?;
            match index.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => guard.value(),
                None => return Ok(None),
            }
        };
        self.get_entry(entry_id)
    }

    /// Newest-first history of a resource.
    pub fn history(&self, resource_id: ResourceId, page: Page) -> StateResult<Vec<LedgerEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(LEDGER_BY_RESOURCE).map_err(map_err!(Table))?;
        let ledger = txn.open_table(LEDGER).map_err(map_err!(Table))?;
        let range = index
            .range((resource_id, 0)..=(resource_id, u64::MAX))
            .map_err(map_err!(Read))?;
        let mut results = Vec::new();
        for item in range.rev().skip(page.offset).take(page.limit) {
            let (key, _) = item.map_err(map_err!(Read))?;
            if let Some(guard) = ledger.get(key.value().1).map_err(map_err!(Read))? {
                results.push(decode(guard.value())?);
            }
        }
        Ok(results)
    }

    // ── Directory ──────────────────────────────────────────────────

    fn put_record<T: Serialize>(
        &self,
        def: redb::TableDefinition<'static, u64, &'static [u8]>,
        id: u64,
        value: &T,
    ) -> StateResult<()> {
        let bytes = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(id, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_record<T: DeserializeOwned>(
        &self,
        def: redb::TableDefinition<'static, u64, &'static [u8]>,
        id: u64,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Insert or update a user record.
    pub fn put_user(&self, user: &UserRecord) -> StateResult<()> {
        self.put_record(USERS, user.id, user)
    }

    pub fn get_user(&self, id: UserId) -> StateResult<Option<UserRecord>> {
        self.get_record(USERS, id)
    }

    /// Insert or update a team record.
    pub fn put_team(&self, team: &TeamRecord) -> StateResult<()> {
        self.put_record(TEAMS, team.id, team)
    }

    pub fn get_team(&self, id: TeamId) -> StateResult<Option<TeamRecord>> {
        self.get_record(TEAMS, id)
    }

    /// The creator of a user's team, if the user belongs to one.
    pub fn team_creator_of(&self, user: &UserRecord) -> StateResult<Option<UserRecord>> {
        let Some(team_id) = user.team_id else {
            return Ok(None);
        };
        let team = self
            .get_team(team_id)?
            .ok_or_else(|| StateError::NotFound(format!("team {team_id}")))?;
        self.get_user(team.creator_id)
    }

    /// Insert or update the blob credentials of a user.
    pub fn put_credentials(&self, creds: &BlobCredentials) -> StateResult<()> {
        self.put_record(CREDENTIALS, creds.user_id, creds)
    }

    pub fn credentials_for(&self, user_id: UserId) -> StateResult<Option<BlobCredentials>> {
        self.get_record(CREDENTIALS, user_id)
    }
}
