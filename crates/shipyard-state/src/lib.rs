//! shipyard-state — the resource ledger and relational repository.
//!
//! Backed by [redb](https://docs.rs/redb). Holds logical resources, the
//! append-only operation ledger, and the directory records (users, teams,
//! blob credentials) the rest of the system looks up.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Ledger entry ids are allocated inside the write transaction that stores
//! the entry, so id order equals append order. Two index tables answer the
//! hot queries without scanning:
//!
//! - `ledger_by_resource` — `(resource_id, entry_id)` for newest-first
//!   history and `latest`
//! - `ledger_by_name` — `{namespace}/{name}` to the newest entry id, used
//!   for ownership resolution
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{Page, StateStore};
