//! WebSocket stream of orchestrator snapshots for the avatar renderer

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::WatchStream;

use super::ApiState;
use crate::orchestrator::Snapshot;

/// Incoming WebSocket message from the kiosk front-end
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsIncoming {
    /// Operator "listen now" trigger
    Listen,
    /// Keepalive
    Ping,
}

/// Outgoing WebSocket message
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutgoing {
    /// Orchestrator state changed
    State(Snapshot),
    /// Error occurred
    Error { code: String, message: String },
    /// Pong response
    Pong,
}

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/state", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<WsOutgoing>(32);

    tracing::info!("state WebSocket connected");

    // Snapshots and replies share one writer
    let mut snapshots = WatchStream::new(state.handle.subscribe());
    let mut send_task = tokio::spawn(async move {
        loop {
            let outgoing = tokio::select! {
                Some(snapshot) = snapshots.next() => WsOutgoing::State(snapshot),
                Some(reply) = rx.recv() => reply,
                else => break,
            };
            let Ok(text) = serde_json::to_string(&outgoing) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Some(reply) = handle_message(&text, &state) {
                        if tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => {
                    tracing::info!("state WebSocket closed by client");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::debug!("state WebSocket disconnected");
}

/// Handle one client message, returning an optional reply
fn handle_message(text: &str, state: &ApiState) -> Option<WsOutgoing> {
    let incoming: WsIncoming = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return Some(WsOutgoing::Error {
                code: "invalid_message".to_string(),
                message: e.to_string(),
            });
        }
    };

    match incoming {
        WsIncoming::Ping => Some(WsOutgoing::Pong),
        WsIncoming::Listen => state.handle.force_listening().err().map(|e| WsOutgoing::Error {
            code: "unavailable".to_string(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incoming_parses_tagged_messages() {
        let msg: WsIncoming = serde_json::from_str(r#"{"type":"listen"}"#).unwrap();
        assert!(matches!(msg, WsIncoming::Listen));
        assert!(serde_json::from_str::<WsIncoming>(r#"{"type":"chat"}"#).is_err());
    }

    #[test]
    fn test_state_message_is_tagged() {
        let json = serde_json::to_value(WsOutgoing::State(Snapshot::default())).unwrap();
        assert_eq!(json["type"], "state");
        assert_eq!(json["mode"], "idle");
    }
}
