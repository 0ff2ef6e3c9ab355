use axum::{
    extract::{ws::WebSocket, ConnectInfo, State, WebSocketUpgrade},
    response::Response,
};
use std::net::SocketAddr;

use crate::error::BridgeError;
use crate::server::AppState;

use super::transport::WebSocketTransport;

/// WebSocket upgrade handler.
///
/// Refuses the upgrade with an error response while the bridge is shutting
/// down or full, so the client never completes a handshake that would be
/// closed straight away.
#[tracing::instrument(name = "ws.upgrade", skip(ws, state))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Result<Response, BridgeError> {
    tracing::debug!(remote = %remote, "WebSocket upgrade requested");

    state.bridge.admit()?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, remote)))
}

/// Hand an established WebSocket to the bridge
async fn handle_socket(socket: WebSocket, state: AppState, remote: SocketAddr) {
    match state.bridge.accept(WebSocketTransport::new(socket)).await {
        Ok(connection_id) => {
            tracing::info!(
                connection_id = %connection_id,
                remote = %remote,
                "WebSocket connection accepted"
            );
        }
        Err(e) => {
            tracing::warn!(remote = %remote, error = %e, "WebSocket connection rejected");
        }
    }
}
