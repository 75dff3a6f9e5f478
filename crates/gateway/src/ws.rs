//! The streaming WebSocket endpoint.
//!
//! Protocol:
//! - Client → Server: `{ "type": "message", "conversation_id": "...", "content": "..." }`
//!   or `{ "type": "cancel" }`
//! - Server → Client: [`SessionEvent`] JSON frames (fragment, token_usage,
//!   done, error)
//!
//! Each socket gets its own session; closing the socket cancels any
//! in-flight generation and removes the session.

use crate::SharedState;
use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;
use tidechat_core::message::ConversationId;
use tidechat_session::SessionEvent;
use tokio::sync::mpsc;
use tracing::info;

/// `GET /ws` — upgrade to the bidirectional session socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// WebSocket message from the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsClientMessage {
    Message {
        conversation_id: String,
        content: String,
    },
    Cancel,
}

async fn handle_ws_connection(mut socket: WebSocket, state: SharedState) {
    let client_id = uuid::Uuid::new_v4().to_string();
    state.sessions.connect(&client_id).await;
    info!(client_id, "WebSocket connection established");

    // Session events funnel through this channel onto the socket; the
    // sender stays alive here so recv() below never yields None.
    let (events_tx, mut events_rx) = mpsc::channel::<SessionEvent>(64);

    loop {
        tokio::select! {
            Some(event) = events_rx.recv() => {
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                let Some(incoming) = incoming else { break };
                let text = match incoming {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue, // ignore binary, ping, pong
                    Err(_) => break,
                };

                let client_msg: WsClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        let event = SessionEvent::Error {
                            kind: "validation_error".into(),
                            message: format!("Invalid message: {e}"),
                        };
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                match client_msg {
                    WsClientMessage::Message {
                        conversation_id,
                        content,
                    } => {
                        let result = state
                            .sessions
                            .submit_message(
                                &client_id,
                                &ConversationId(conversation_id),
                                &content,
                                events_tx.clone(),
                            )
                            .await;
                        if let Err(e) = result {
                            let event = SessionEvent::from_error(&e);
                            if send_event(&mut socket, &event).await.is_err() {
                                break;
                            }
                        }
                    }
                    WsClientMessage::Cancel => {
                        state.sessions.cancel(&client_id).await;
                    }
                }
            }
        }
    }

    // Closing the socket tears the session down, cancelling anything
    // still in flight.
    state.sessions.disconnect(&client_id).await;
    info!(client_id, "WebSocket connection closed");
}

async fn send_event(socket: &mut WebSocket, event: &SessionEvent) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).unwrap_or_default();
    socket.send(WsMessage::Text(json.into())).await
}
