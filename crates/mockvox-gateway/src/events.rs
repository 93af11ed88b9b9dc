//! Presence broadcasting to connected clients.

use std::sync::Arc;

use mockvox_core::protocol::Message;
use tracing::debug;

use crate::state::GatewayState;

/// Send a server notice to every connection except `except`.
pub async fn broadcast_notice(state: &Arc<GatewayState>, except: &str, content: &str) {
    let msg = match Message::notice(content).encode() {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(%e, "Failed to serialize broadcast");
            return;
        }
    };

    let connections = state.connections.read().await;
    let mut sent = 0;
    for conn in connections.values().filter(|c| c.conn_id != except) {
        if conn.event_tx.send(msg.clone()).is_ok() {
            sent += 1;
        }
    }
    debug!(content, sent, "Broadcast notice");
}
