//! Per-connection WebSocket handling
//!
//! Lifecycle: register → `connected` greeting → frame loop → cleanup.
//! Every `message` frame is dispatched on its own task, so a slow agent
//! call never blocks the connection's other frames.

use super::{AppState, Broadcaster, Frame};
use crate::dispatcher::{Origin, ERROR_EVENT};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Greeting sent on every new connection
pub const CONNECTED_EVENT: &str = "connected";

/// Acknowledgement of a channel join
pub const JOINED_EVENT: &str = "joined";

/// Acknowledgement of an explicit session end
pub const LEFT_EVENT: &str = "left";

/// Handle a single WebSocket connection until it closes
pub async fn handle_connection(socket: WebSocket, state: Arc<AppState>, remote_addr: SocketAddr) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let origin = Origin::connection(conn_id.clone(), Some(remote_addr.ip().to_string()));
    info!(conn_id = %conn_id, remote_ip = %remote_addr.ip(), "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(text) = client_rx.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
        }
    });

    state.channels.register(&conn_id, client_tx).await;
    if let Err(e) = state
        .channels
        .emit_to_connection(
            &conn_id,
            CONNECTED_EVENT,
            json!({ "message": "Socket connected successfully!" }),
        )
        .await
    {
        warn!(conn_id = %conn_id, error = %e, "ws: failed to send greeting");
    }

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            }
        };

        let frame: Frame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "ws: invalid frame");
                reply_error(&state, &conn_id, "Invalid frame").await;
                continue;
            }
        };

        handle_frame(&state, &origin, frame).await;
    }

    let channels = state.channels.unregister(&conn_id).await;
    info!(conn_id = %conn_id, channels = channels.len(), "ws: connection closed");
    write_handle.abort();
}

async fn handle_frame(state: &Arc<AppState>, origin: &Origin, frame: Frame) {
    let conn_id = origin.connection_id.as_deref().unwrap_or_default();
    match frame.event.as_str() {
        "message" => {
            let state = Arc::clone(state);
            let origin = origin.clone();
            tokio::spawn(async move {
                let outcome = state.dispatcher.dispatch(&origin, frame.data).await;
                debug!(
                    conn_id = origin.connection_id.as_deref().unwrap_or_default(),
                    outcome = ?outcome,
                    "ws: message dispatched"
                );
            });
        }
        "join" => {
            let Some(user_id) = user_id_of(&frame.data) else {
                reply_error(state, conn_id, "user_id required").await;
                return;
            };
            if let Err(e) = state.channels.join(conn_id, &user_id).await {
                warn!(conn_id, user_id = %user_id, error = %e, "ws: join failed");
                return;
            }
            if let Err(e) = state
                .sessions
                .refresh(&user_id, Some(conn_id), origin.address.as_deref())
                .await
            {
                warn!(conn_id, user_id = %user_id, error = %e, "ws: session refresh failed");
            }
            let ack = json!({ "message": format!("Joined room {}", user_id) });
            if let Err(e) = state.channels.emit(&user_id, JOINED_EVENT, ack).await {
                warn!(conn_id, user_id = %user_id, error = %e, "ws: failed to acknowledge join");
            }
        }
        "leave" => {
            let Some(user_id) = user_id_of(&frame.data) else {
                reply_error(state, conn_id, "user_id required").await;
                return;
            };
            if let Err(e) = state.sessions.end(&user_id).await {
                warn!(conn_id, user_id = %user_id, error = %e, "ws: failed to end session");
            }
            state.channels.leave(conn_id, &user_id).await;
            let ack = json!({ "message": format!("Left room {}", user_id) });
            if let Err(e) = state.channels.emit_to_connection(conn_id, LEFT_EVENT, ack).await {
                debug!(conn_id, error = %e, "ws: failed to acknowledge leave");
            }
        }
        other => {
            debug!(conn_id, event = other, "ws: unknown event");
            reply_error(state, conn_id, &format!("Unknown event: {}", other)).await;
        }
    }
}

/// Read a user id from a `join`/`leave` payload; numbers are accepted
fn user_id_of(data: &Value) -> Option<String> {
    let raw = match data {
        Value::Object(obj) => obj.get("user_id")?,
        other => other,
    };
    match raw {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

async fn reply_error(state: &AppState, conn_id: &str, message: &str) {
    if let Err(e) = state
        .channels
        .emit_to_connection(conn_id, ERROR_EVENT, json!({ "error": message }))
        .await
    {
        debug!(conn_id, error = %e, "ws: failed to report error");
    }
}
