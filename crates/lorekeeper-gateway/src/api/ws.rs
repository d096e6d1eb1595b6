//! WebSocket subscriber endpoint
//!
//! Each socket becomes one hub connection. Outbound hub messages are
//! serialized as JSON text frames; inbound text frames are parsed as
//! subscriber protocol messages.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use lorekeeper::hub::{ClientMessage, HubError, HubMessage};
use tracing::{debug, warn};

use super::state::AppState;

/// Upgrade to a subscriber connection
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let hub = state.lorekeeper.hub().clone();
    let store = state.lorekeeper.store().clone();

    let mut connection = match hub.connect(store.len()).await {
        Ok(connection) => connection,
        Err(e) => {
            warn!(error = %e, "Rejected WebSocket subscriber");
            return;
        }
    };
    let client_id = connection.id.clone();
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = connection.receiver.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, kind = message.kind(), "Failed to encode hub message");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let recv_hub = hub.clone();
    let recv_id = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let failure = match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => recv_hub
                    .handle_client_message(&recv_id, message, &store)
                    .await
                    .err()
                    .map(|e| e.to_string()),
                Err(e) => Some(format!("Malformed message: {e}")),
            };
            if let Some(reason) = failure {
                debug!(client_id = %recv_id, %reason, "Client message rejected");
                match recv_hub.send_to(&recv_id, HubMessage::error(reason)).await {
                    // Slow reader; the error reply is dropped, not the socket.
                    Ok(()) | Err(HubError::QueueFull(_)) => {}
                    Err(_) => break,
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    hub.disconnect(&client_id).await;
}
