//! WebSocket Connection Handler
//!
//! One writer task drains the client's outbox (batching queued frames into a
//! single newline-separated message and sending keepalive pings), one reader
//! task applies client actions. When either ends, both stop and the client is
//! unregistered.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::actor::HubHandle;
use super::protocol::{ClientAction, parse_actions};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Per-client outbound queue; frames beyond it are dropped
    pub client_queue: usize,
    pub ping_interval: Duration,
    /// Close the connection after this long without any inbound message
    pub idle_timeout: Duration,
    pub max_frames_per_write: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            client_queue: 64,
            ping_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            max_frames_per_write: 32,
        }
    }
}

/// Serve one upgraded socket until either side goes away.
pub async fn serve_connection(socket: WebSocket, hub: HubHandle, user: Option<String>, config: ConnectionConfig) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(config.client_queue.max(1));

    let session = match hub.register(user.clone(), tx).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting connection");
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };
    tracing::info!(session = %session, user = ?user, "client connected");

    let max_frames = config.max_frames_per_write.max(1);
    let ping_interval = config.ping_interval;
    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(first) = frame else { break };
                    let mut batch = String::from(&*first);
                    let mut count = 1;
                    while count < max_frames {
                        match rx.try_recv() {
                            Ok(next) => {
                                batch.push('\n');
                                batch.push_str(&next);
                                count += 1;
                            }
                            Err(_) => break,
                        }
                    }
                    if ws_sender.send(Message::Text(batch)).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let reader_hub = hub.clone();
    let idle_timeout = config.idle_timeout;
    let mut recv_task = tokio::spawn(async move {
        loop {
            let msg = match tokio::time::timeout(idle_timeout, ws_receiver.next()).await {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => {
                    tracing::debug!(session = %session, error = %e, "websocket read failed");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::info!(session = %session, ?idle_timeout, "client idle, closing");
                    break;
                }
            };

            match msg {
                Message::Text(text) => handle_text(&reader_hub, session, &text).await,
                Message::Close(_) => break,
                // Pongs and pings only refresh the idle timer
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Err(e) = hub.unregister(session).await {
        tracing::debug!(session = %session, error = %e, "unregister after hub shutdown");
    }
    tracing::info!(session = %session, "client disconnected");
}

async fn handle_text(hub: &HubHandle, session: Uuid, text: &str) {
    for action in parse_actions(text) {
        let action = match action {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "ignoring malformed client frame");
                continue;
            }
        };

        let result = match action {
            ClientAction::Subscribe { project_id } => {
                tracing::debug!(session = %session, project = %project_id, "subscribe");
                hub.subscribe(session, project_id).await
            }
            ClientAction::Unsubscribe { project_id } => {
                tracing::debug!(session = %session, project = %project_id, "unsubscribe");
                hub.unsubscribe(session, project_id).await
            }
            ClientAction::UiResponse {
                project_id,
                request_id,
                data,
                error,
            } => {
                let outcome = match error {
                    Some(error) => Err(error),
                    None => Ok(data),
                };
                hub.ui_response(session, project_id, request_id, outcome).await
            }
        };

        if let Err(e) = result {
            tracing::warn!(session = %session, error = %e, "client action not applied");
        }
    }
}
