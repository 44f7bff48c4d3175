//! WebSocket endpoint: `/ws/runs/{run_id}`.
//!
//! On accept the socket subscribes to the run's hub channel and forwards
//! every `{kind, data}` frame as JSON text. Inbound client text is treated
//! as keep-alive and ignored. The socket closes when:
//!
//! - the client disconnects,
//! - the subscriber is evicted for lagging, or
//! - the run reaches a terminal status (unless `KEEP_OPEN_AFTER_TERMINAL`).

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use warden_hub::SubscriberGone;
use warden_types::MessageKind;

use crate::state::AppState;

pub async fn ws_run(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, run_id, state))
}

async fn handle_socket(mut socket: WebSocket, run_id: String, state: AppState) {
    let mut subscriber = state.hub.subscribe(&run_id);
    tracing::debug!(%run_id, "websocket subscriber attached");

    loop {
        tokio::select! {
            frame = subscriber.recv() => {
                match frame {
                    Ok(message) => {
                        let text = match serde_json::to_string(&message) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::warn!(error = %e, "hub frame failed to serialize");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                        if terminal_status(&message) && !state.keep_open_after_terminal {
                            let _ = socket.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Err(SubscriberGone::Evicted { dropped }) => {
                        tracing::warn!(%run_id, dropped, "evicting slow websocket client");
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                    Err(SubscriberGone::Closed) => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    // Keep-alive or chatter; content is ignored.
                    Some(Ok(Message::Text(_) | Message::Binary(_) | Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                }
            }
        }
    }
    tracing::debug!(%run_id, "websocket subscriber detached");
}

fn terminal_status(message: &warden_types::HubMessage) -> bool {
    message.kind == MessageKind::Status
        && message
            .data
            .get("status")
            .and_then(|s| s.as_str())
            .map(|s| s != "running")
            .unwrap_or(false)
}
