//! WebSocket handler for live client connections.
//!
//! Protocol:
//! → Client sends: {"type":"join","role":"parent","branch_id":"b1","user_id":"u1"}
//! → Client sends: {"type":"subscribe","room":"attendance-updates"}
//! → Client sends: {"type":"ping"}
//! ← Server sends: {"type":"connected", ...} on upgrade
//! ← Server sends: {"type":"<event>","data":{...},"timestamp":"..."} envelopes

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};

use courtline_core::types::Role;

use super::hub::{ClientIdentity, ATTENDANCE_ROOM, SCHEDULE_ROOM};
use super::server::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one WebSocket connection's lifetime.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (conn, mut outbound) = state.hub.connect();
    tracing::info!("WebSocket client connected (conn={conn})");

    let welcome = serde_json::json!({
        "type": "connected",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now(),
    });
    if send_json(&mut socket, &welcome).await.is_err() {
        state.hub.disconnect(conn);
        return;
    }

    loop {
        tokio::select! {
            event = outbound.recv() => {
                match event {
                    Some(payload) => {
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&state, conn, &mut socket, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error (conn={conn}): {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.disconnect(conn);
    tracing::info!("WebSocket client disconnected (conn={conn})");
}

async fn handle_client_message(state: &AppState, conn: u64, socket: &mut WebSocket, text: &str) {
    let json: serde_json::Value = match serde_json::from_str(text) {
        Ok(j) => j,
        Err(e) => {
            send_error(socket, &format!("Invalid JSON: {e}")).await;
            return;
        }
    };

    match json["type"].as_str().unwrap_or("unknown") {
        "join" => {
            let identity = ClientIdentity {
                role: json["role"].as_str().and_then(Role::parse),
                branch_id: json["branch_id"].as_str().map(String::from),
                user_id: json["user_id"].as_str().map(String::from),
            };
            state.hub.join(conn, &identity);
            let _ = send_json(
                socket,
                &serde_json::json!({
                    "type": "joined",
                    "role": identity.role.map(|r| r.to_string()),
                    "branch_id": identity.branch_id,
                    "user_id": identity.user_id,
                }),
            )
            .await;
        }
        "subscribe" => {
            // Only feature rooms are free to subscribe to; identity rooms
            // come from the join message.
            match json["room"].as_str() {
                Some(room @ (ATTENDANCE_ROOM | SCHEDULE_ROOM)) => {
                    state.hub.join_room(conn, room);
                    let _ = send_json(
                        socket,
                        &serde_json::json!({"type": "subscribed", "room": room}),
                    )
                    .await;
                }
                Some(other) => send_error(socket, &format!("Unknown room: {other}")).await,
                None => send_error(socket, "Missing room").await,
            }
        }
        "ping" => {
            let _ = send_json(
                socket,
                &serde_json::json!({
                    "type": "pong",
                    "timestamp": chrono::Utc::now().timestamp_millis(),
                }),
            )
            .await;
        }
        other => send_error(socket, &format!("Unknown message type: {other}")).await,
    }
}

async fn send_json(socket: &mut WebSocket, value: &serde_json::Value) -> Result<(), ()> {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .map_err(|e| {
            tracing::debug!("WS send failed: {e}");
        })
}

async fn send_error(socket: &mut WebSocket, message: &str) {
    let error = serde_json::json!({
        "type": "error",
        "message": message,
    });
    let _ = send_json(socket, &error).await;
}
