//! Per-socket session handling.
//!
//! Each upgraded WebSocket is split into a writer task draining the client's
//! outbound queue and a reader loop feeding text frames to the relay.

use crate::error::ProtocolError;
use crate::server::SignalRelay;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::Extension;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

/// Upgrade handler mounted at the configured WebSocket path.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(relay): Extension<Arc<SignalRelay>>,
) -> impl IntoResponse {
    let max = relay.config().limits.max_message_size;
    ws.max_message_size(max.saturating_mul(2))
        .on_upgrade(move |socket| run_socket(relay, socket))
}

/// Run one client socket until it closes.
pub async fn run_socket(relay: Arc<SignalRelay>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client, mut outbound) = relay.attach();
    tracing::info!(client, "New signaling connection");

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => relay.handle_text(client, &text),
            Ok(Message::Binary(_)) => relay.reply_error(client, &ProtocolError::InvalidJson),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(client, "WebSocket error: {}", e);
                break;
            }
        }
    }

    // Dropping the queue sender lets the writer finish
    relay.detach(client);
    if let Err(e) = writer.await {
        tracing::warn!(client, "Writer task failed: {}", e);
    }
    tracing::info!(client, "Signaling connection closed");
}
