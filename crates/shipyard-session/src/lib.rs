//! shipyard-session — live command sessions and the resource REST API.
//!
//! One duplex session per authenticated user decodes command frames,
//! dispatches them to read-only cluster introspection or to the deploy
//! pipeline, and streams envelopes back. The reconcile loop pushes
//! snapshots into open sessions through the `SessionRegistry`.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `{session_path}` (default `/ws/k8s`) | Upgrade to a command session |
//! | POST | `/api/v1/resources` | Register a resource |
//! | GET | `/api/v1/resources` | List a repository's resources |
//! | GET | `/api/v1/resources/{id}` | Get a resource |
//! | POST | `/api/v1/resources/{id}/redeploy` | Redeploy from a new manifest |
//! | GET | `/api/v1/resources/{id}/ledger` | Operation history, newest first |

pub mod api;
pub mod commands;
pub mod context;
pub mod error;
pub mod format;
pub mod frame;
pub mod registry;
pub mod session;
pub mod socket;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

pub use context::SessionContext;
pub use registry::SessionRegistry;
pub use session::{Flow, Session, SessionState};

/// Build the complete router (session upgrade + REST).
pub fn build_router(ctx: Arc<SessionContext>) -> Router {
    let api_routes = Router::new()
        .route("/resources", get(api::list_resources).post(api::register_resource))
        .route("/resources/{id}", get(api::get_resource))
        .route("/resources/{id}/redeploy", post(api::redeploy_resource))
        .route("/resources/{id}/ledger", get(api::resource_ledger))
        .with_state(ctx.clone());

    Router::new()
        .route(&ctx.server.session_path, get(socket::session_upgrade))
        .with_state(ctx)
        .nest("/api/v1", api_routes)
}
