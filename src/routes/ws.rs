//! WebSocket handler: live result feed.
//!
//! DESIGN
//! ======
//! On upgrade, opens a broadcast `Session` and enters a `select!` loop:
//! - Incoming client text → `join-*` / `leave-*` membership changes
//! - Queued broadcast payloads → forward to the client verbatim
//!
//! The feed is one-way for data: clients only choose which channels to hear.
//! Votes and submissions arrive over REST.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `connected` with `connection_id`
//! 2. Client sends join/leave events → registry membership changes
//! 3. Socket closes, errors, or the service stops → session purged once

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, info, warn};

use crate::broadcast::event::ServerEvent;
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if !state.broadcast.is_running() {
        return (StatusCode::SERVICE_UNAVAILABLE, "live updates unavailable").into_response();
    }
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let Some((mut session, mut outbound)) = state.broadcast.connect() else {
        let frame = CloseFrame { code: close_code::AWAY, reason: "server shutting down".into() };
        let _ = socket.send(Message::Close(Some(frame))).await;
        return;
    };
    let connection_id = session.id();

    let welcome = ServerEvent::Connected { connection_id };
    match welcome.encode() {
        Ok(payload) => {
            if socket.send(Message::Text(payload.as_ref().into())).await.is_err() {
                session.disconnect();
                return;
            }
        }
        Err(e) => warn!(%connection_id, error = %e, "ws: failed to encode welcome"),
    }

    info!(%connection_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        if session.handle_text(text.as_str()) {
                            debug!(%connection_id, state = ?session.state(), "ws: membership changed");
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            payload = outbound.recv() => {
                // `None` means the registry dropped our sender: service stopped.
                let Some(payload) = payload else {
                    debug!(%connection_id, "ws: outbound queue closed");
                    let frame = CloseFrame { code: close_code::AWAY, reason: "server shutting down".into() };
                    let _ = socket.send(Message::Close(Some(frame))).await;
                    break;
                };
                if socket.send(Message::Text(payload.as_ref().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    session.disconnect();
    info!(%connection_id, "ws: client disconnected");
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
