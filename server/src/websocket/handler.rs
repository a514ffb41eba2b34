//! Per-connection WebSocket loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::{ChangeHub, ClientMessage, ServerMessage};

/// Handle an established WebSocket connection.
///
/// Outgoing messages (replies and published changes) go through a channel
/// drained by a forwarding task; incoming messages are handled inline until
/// the client closes or the socket fails.
pub async fn handle_socket(socket: WebSocket, hub: Arc<ChangeHub>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = hub.register(tx);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let reply = process_message(text.as_str(), &hub, &conn_id);
                hub.send_to(&conn_id, reply);
            }
            Ok(Message::Binary(_)) => {
                hub.send_to(&conn_id, ServerMessage::error("binary messages are not supported"));
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    hub.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = hub.connection_count(),
        "WebSocket client disconnected"
    );
}

fn process_message(text: &str, hub: &ChangeHub, conn_id: &str) -> ServerMessage {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => return ServerMessage::error(format!("Invalid message format: {e}")),
    };

    match message {
        ClientMessage::Subscribe { tables } => {
            hub.subscribe(conn_id, tables.iter().cloned());
            ServerMessage::Subscribed { tables }
        }
        ClientMessage::Ping => ServerMessage::Pong,
    }
}
