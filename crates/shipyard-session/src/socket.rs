//! Websocket transport for command sessions.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use shipyard_core::{Envelope, UserId};

use crate::api::caller;
use crate::context::SessionContext;
use crate::session::{Flow, Session};

/// GET {session_path}: upgrade an authenticated request to a session.
pub async fn session_upgrade(
    State(ctx): State<Arc<SessionContext>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // Identity is checked before the upgrade is considered.
    let user_id = match caller(&headers, &ctx.server.identity_header) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| serve(ctx, user_id, socket)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn serve(ctx: Arc<SessionContext>, user_id: UserId, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Envelope>(ctx.server.outbound_capacity);

    // Single writer: session replies and pushed snapshots share this queue.
    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode envelope");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut session = Session::new(ctx, user_id, tx);
    let closer = session.closer();
    info!(user_id, session_id = session.session_id(), "session connected");

    loop {
        tokio::select! {
            _ = closer.notified() => {
                debug!(user_id, "session replaced by a newer connection");
                break;
            }
            frame = stream.next() => {
                let flow = match frame {
                    Some(Ok(Message::Text(text))) => session.handle_frame(text.as_str()).await,
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => session.handle_frame(text).await,
                        Err(_) => Flow::Close,
                    },
                    Some(Ok(Message::Close(_))) | None => Flow::Close,
                    Some(Ok(_)) => Flow::Continue,
                    Some(Err(e)) => {
                        debug!(user_id, error = %e, "session read failed");
                        Flow::Close
                    }
                };
                if flow == Flow::Close {
                    break;
                }
            }
        }
    }

    session.teardown().await;
    // Dropping the session's sender lets the writer drain and finish.
    drop(session);
    let _ = writer.await;
}
