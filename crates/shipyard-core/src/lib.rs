pub mod command;
pub mod config;
pub mod envelope;
pub mod types;

pub use config::ShipyardConfig;
pub use envelope::{CommandResult, Envelope};
pub use types::*;
