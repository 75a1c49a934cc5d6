//! WebSocket feed of conversation snapshots
//!
//! Sends the current snapshot on connect and again after every change.
//! Incoming messages other than ping/close are ignored.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio_stream::wrappers::WatchStream;

use super::ApiState;
use crate::conversation::ConversationSnapshot;

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(snapshot: &ConversationSnapshot) -> Option<Message> {
    match serde_json::to_string(snapshot) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode snapshot");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut snapshots = WatchStream::new(state.orchestrator.subscribe());

    tracing::debug!("websocket connected");

    loop {
        tokio::select! {
            snapshot = snapshots.next() => {
                let Some(snapshot) = snapshot else {
                    break;
                };
                if let Some(msg) = encode(&snapshot)
                    && sender.send(msg).await.is_err()
                {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!("websocket disconnected");
}

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}
