use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::logs::{IncrementalTail, LogStream, TailDelta};
use crate::orchestrator::Orchestrator;

use super::routes::DashboardState;

/// How often an active log tail is polled for growth.
const TAIL_POLL: Duration = Duration::from_millis(500);

/// Messages a dashboard client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Tail {
        name: String,
        #[serde(default)]
        stream: LogStream,
        #[serde(default)]
        filter: Option<String>,
    },
    Untail,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage<'a> {
    Tail {
        name: &'a str,
        stream: LogStream,
        #[serde(flatten)]
        delta: &'a TailDelta,
    },
    Error {
        message: String,
    },
}

pub fn ws_router(state: DashboardState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<DashboardState>,
) -> impl IntoResponse {
    let rx = state.snapshots_tx.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx, state.orch))
}

/// The log tail a connection is following, if any.
struct ActiveTail {
    name: String,
    tail: IncrementalTail,
}

async fn handle_socket(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<String>,
    orch: Orchestrator,
) {
    let mut active: Option<ActiveTail> = None;
    let mut ticker = tokio::time::interval(TAIL_POLL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("WebSocket client lagged by {} snapshots", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_message(&orch, &mut active, text.as_str()) {
                            if socket.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ => {}
                }
            }
            _ = ticker.tick(), if active.is_some() => {
                let Some(reply) = poll_tail(&mut active) else { continue };
                if socket.send(Message::Text(reply.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Apply a client request. Returns an error message to send back, if any.
fn handle_client_message(
    orch: &Orchestrator,
    active: &mut Option<ActiveTail>,
    text: &str,
) -> Option<String> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => return error_message(format!("invalid message: {}", e)),
    };
    match msg {
        ClientMessage::Untail => {
            *active = None;
            None
        }
        ClientMessage::Tail {
            name,
            stream,
            filter,
        } => {
            // Same process: keep the cache, switch stream or filter in place.
            if let Some(current) = active.as_mut().filter(|a| a.name == name) {
                current.tail.set_stream(stream);
                current.tail.set_filter(filter);
                return None;
            }
            let record = match orch.record(&name) {
                Ok(r) => r,
                Err(e) => return error_message(e.to_string()),
            };
            let mut tail = IncrementalTail::new(record.stdout_path, record.stderr_path);
            tail.set_stream(stream);
            tail.set_filter(filter);
            *active = Some(ActiveTail { name, tail });
            None
        }
    }
}

fn poll_tail(active: &mut Option<ActiveTail>) -> Option<String> {
    let current = active.as_mut()?;
    match current.tail.poll() {
        Ok(Some(delta)) => serde_json::to_string(&ServerMessage::Tail {
            name: &current.name,
            stream: current.tail.stream(),
            delta: &delta,
        })
        .ok(),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!(name = %current.name, error = %e, "log tail poll failed");
            None
        }
    }
}

fn error_message(message: String) -> Option<String> {
    serde_json::to_string(&ServerMessage::Error { message }).ok()
}
