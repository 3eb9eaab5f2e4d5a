//! Real-time gateway.
//!
//! Clients connect to `/ws`, then send `{"join":"student:S1"}` (or `leave`) to
//! manage channel membership. Every event emitted to a joined channel is
//! forwarded as a text frame `{"channel":..,"event":..,"data":..}`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use herald_notifier::{RealtimeHub, RealtimeMessage};

use crate::state::AppState;

/// Frames queued for one client before channel forwarders wait.
const OUTBOUND_BUFFER: usize = 64;
const PING_INTERVAL: Duration = Duration::from_secs(30);

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

/// Client-to-server command.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientCommand {
    Join(String),
    Leave(String),
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<RealtimeHub>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<RealtimeMessage>(OUTBOUND_BUFFER);
    let mut joined: HashMap<String, JoinHandle<()>> = HashMap::new();
    let mut ping = tokio::time::interval(PING_INTERVAL);

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            Some(message) = rx.recv() => {
                match serde_json::to_string(&message) {
                    Ok(json) => {
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to encode real-time frame"),
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientCommand>(text.as_str()) {
                            Ok(ClientCommand::Join(channel)) => {
                                if joined.contains_key(&channel) {
                                    continue;
                                }
                                match hub.subscribe(&channel) {
                                    Ok(sub) => {
                                        debug!(channel = %channel, "Client joined channel");
                                        let forwarder = forward(sub, tx.clone());
                                        joined.insert(channel, forwarder);
                                    }
                                    Err(e) => warn!(channel = %channel, error = %e, "Join failed"),
                                }
                            }
                            Ok(ClientCommand::Leave(channel)) => {
                                if let Some(forwarder) = joined.remove(&channel) {
                                    release(&hub, [forwarder]).await;
                                    debug!(channel = %channel, "Client left channel");
                                }
                            }
                            Err(e) => debug!(error = %e, "Ignoring unrecognized client message"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    release(&hub, joined.into_values()).await;
}

/// Stop forwarders and drop the hub channels nobody listens to any more.
async fn release(hub: &RealtimeHub, forwarders: impl IntoIterator<Item = JoinHandle<()>>) {
    for forwarder in forwarders {
        forwarder.abort();
        // Resolves once the task is dropped, together with its receiver.
        let _ = forwarder.await;
    }
    hub.prune();
}

/// Relay one channel subscription into the client's outbound queue.
fn forward(
    mut sub: broadcast::Receiver<RealtimeMessage>,
    tx: mpsc::Sender<RealtimeMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match sub.recv().await {
                Ok(message) => {
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Slow real-time client, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_command_parsing() {
        assert_eq!(
            serde_json::from_str::<ClientCommand>(r#"{"join":"student:S1"}"#).unwrap(),
            ClientCommand::Join("student:S1".to_string())
        );
        assert_eq!(
            serde_json::from_str::<ClientCommand>(r#"{"leave":"branch:B1"}"#).unwrap(),
            ClientCommand::Leave("branch:B1".to_string())
        );
        assert!(serde_json::from_str::<ClientCommand>(r#"{"subscribe":"x"}"#).is_err());
    }

    #[tokio::test]
    async fn test_forwarder_relays_hub_events() {
        use herald_notifier::ChannelServer;

        let hub = RealtimeHub::new();
        let (tx, mut rx) = mpsc::channel(4);
        let forwarder = forward(hub.subscribe("student:S1").unwrap(), tx);

        hub.emit("student:S1", "notificationCreated", &serde_json::json!({"id": 1}))
            .await
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.channel, "student:S1");
        assert_eq!(message.data["id"], 1);
        forwarder.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_release_prunes_left_channels() {
        let hub = RealtimeHub::new();
        let (tx, _rx) = mpsc::channel(4);
        let left = forward(hub.subscribe("student:S1").unwrap(), tx.clone());
        let kept = forward(hub.subscribe("branch:B1").unwrap(), tx);

        release(&hub, [left]).await;

        assert_eq!(hub.subscriber_count("student:S1"), 0);
        assert_eq!(hub.subscriber_count("branch:B1"), 1);
        assert_eq!(hub.channel_count(), 1);

        release(&hub, [kept]).await;
        assert_eq!(hub.channel_count(), 0);
    }
}
