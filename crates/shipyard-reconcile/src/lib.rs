//! Reconciliation loop.
//!
//! Every interval the `Reconciler` re-derives the live status of each
//! ledger-tracked resource, appends a `check` entry, and fans out a
//! per-user snapshot of running resources to the snapshot cache and to
//! the user's open session, if any.

pub mod error;
pub mod reconciler;

pub use error::{ReconcileError, ReconcileResult};
pub use reconciler::{ReconcileReport, Reconciler, SnapshotPush};
