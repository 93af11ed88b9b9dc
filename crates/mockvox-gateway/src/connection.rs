//! WebSocket connection lifecycle: greeting, read/write loops, presence.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mockvox_core::protocol::{GENERIC_ERROR, Message};
use mockvox_interview::InterviewSession;

use crate::events::broadcast_notice;
use crate::orchestrator::Orchestrator;
use crate::services::Services;
use crate::state::{ConnectionState, GatewayState};

pub const WELCOME: &str = "Welcome!";
pub const JOINED: &str = "A new client has connected.";
pub const LEFT: &str = "A client has disconnected.";

/// Best-effort `event_id` of a frame that failed to decode.
fn raw_event_id(bytes: &[u8]) -> Option<String> {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()?
        .get("event_id")?
        .as_str()
        .map(str::to_string)
}

fn send_frame(tx: &mpsc::UnboundedSender<String>, msg: &Message) {
    match msg.encode() {
        Ok(frame) => {
            let _ = tx.send(frame);
        }
        Err(e) => error!(%e, "Failed to serialize frame"),
    }
}

/// Handle an upgraded WebSocket. The interview session was built from the
/// upgrade request and is owned by this connection alone.
pub async fn handle_ws_connection(
    state: Arc<GatewayState>,
    ws: WebSocket,
    session: InterviewSession,
    services: Services,
) {
    let conn_id = Uuid::new_v4().to_string();
    info!(
        conn_id = %conn_id,
        industry = %session.industry().id,
        interview_type = %session.interview().id,
        "New WebSocket connection"
    );

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<String>();

    {
        let mut connections = state.connections.write().await;
        connections.insert(
            conn_id.clone(),
            ConnectionState {
                conn_id: conn_id.clone(),
                event_tx: event_tx.clone(),
            },
        );
    }

    let send_task = tokio::spawn(async move {
        while let Some(msg) = event_rx.recv().await {
            if ws_tx.send(WsMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    send_frame(&event_tx, &Message::notice(WELCOME));
    broadcast_notice(&state, &conn_id, JOINED).await;

    // Turns run off the read loop so decode errors and pings are answered
    // while a turn is waiting on upstream services.
    let (turn_tx, turn_rx) = mpsc::unbounded_channel::<Message>();
    let orchestrator = Orchestrator::new(conn_id.clone(), session, services, event_tx.clone());
    let turn_task = tokio::spawn(orchestrator.run(turn_rx));

    while let Some(msg_result) = ws_rx.next().await {
        let bytes = match msg_result {
            Ok(WsMessage::Text(text)) => text.as_str().as_bytes().to_vec(),
            Ok(WsMessage::Binary(data)) => data.to_vec(),
            Ok(WsMessage::Close(_)) => {
                debug!(conn_id = %conn_id, "Client requested close");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!(conn_id = %conn_id, %e, "WebSocket error");
                break;
            }
        };

        match Message::decode(&bytes) {
            Ok(Message::Ping(ping)) => {
                debug!(conn_id = %conn_id, event_id = %ping.event_id, "Ping");
            }
            Ok(msg) => {
                debug!(conn_id = %conn_id, event_id = %msg.event_id(), "Client frame");
                if turn_tx.send(msg).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(conn_id = %conn_id, %e, "Invalid frame received");
                send_frame(&event_tx, &Message::error(GENERIC_ERROR, raw_event_id(&bytes)));
            }
        }
    }

    // A turn still in flight runs to completion; its frames go nowhere.
    drop(turn_tx);
    drop(turn_task);
    send_task.abort();
    cleanup_connection(&state, &conn_id).await;
    broadcast_notice(&state, &conn_id, LEFT).await;
    info!(conn_id = %conn_id, "WebSocket connection closed");
}

async fn cleanup_connection(state: &Arc<GatewayState>, conn_id: &str) {
    let mut connections = state.connections.write().await;
    connections.remove(conn_id);
}
