//! redb table definitions for the Shipyard state store.

use redb::TableDefinition;

/// Logical resources keyed by resource id.
pub const RESOURCES: TableDefinition<u64, &[u8]> = TableDefinition::new("resources");

/// Ledger entries keyed by entry id.
pub const LEDGER: TableDefinition<u64, &[u8]> = TableDefinition::new("ledger");

/// `(resource_id, entry_id)` index over the ledger.
pub const LEDGER_BY_RESOURCE: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("ledger_by_resource");

/// Newest entry id per `{namespace}/{name}`.
pub const LEDGER_BY_NAME: TableDefinition<&str, u64> = TableDefinition::new("ledger_by_name");

/// Users keyed by user id.
pub const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");

/// Teams keyed by team id.
pub const TEAMS: TableDefinition<u64, &[u8]> = TableDefinition::new("teams");

/// Blob-storage credentials keyed by user id.
pub const CREDENTIALS: TableDefinition<u64, &[u8]> = TableDefinition::new("credentials");

/// Key of the name index.
pub fn name_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
