//! Real-time channel server contract and the in-process hub behind `/ws`.
//!
//! Channels are named `<type>:<id>` (e.g. `student:S1`). A subscriber joins a
//! channel and receives every event emitted to it after joining.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{NotifierError, NotifierResult};

/// Event emitted when a notification record is materialized.
pub const NOTIFICATION_CREATED: &str = "notificationCreated";

/// Frames buffered per channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 256;

/// A handle able to publish an event to a named channel.
#[async_trait]
pub trait ChannelServer: Send + Sync {
    async fn emit(
        &self,
        channel: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> NotifierResult<()>;
}

/// Accessor for the currently active channel server.
///
/// Starts empty; the gateway installs its server once it is listening.
/// `active()` never fails: an absent server is simply `None`.
#[derive(Clone, Default)]
pub struct ChannelServerHandle {
    inner: Arc<RwLock<Option<Arc<dyn ChannelServer>>>>,
}

impl ChannelServerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, server: Arc<dyn ChannelServer>) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = Some(server);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = None;
        }
    }

    pub fn active(&self) -> Option<Arc<dyn ChannelServer>> {
        self.inner.read().ok().and_then(|slot| slot.clone())
    }
}

/// One frame delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub channel: String,
    pub event: String,
    pub data: serde_json::Value,
}

/// In-process channel server: one broadcast sender per channel with live subscribers.
#[derive(Default)]
pub struct RealtimeHub {
    channels: Mutex<HashMap<String, broadcast::Sender<RealtimeMessage>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a channel.
    pub fn subscribe(&self, channel: &str) -> NotifierResult<broadcast::Receiver<RealtimeMessage>> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| NotifierError::Realtime("channel registry poisoned".to_string()))?;
        let sender = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(sender.subscribe())
    }

    /// Number of subscribers currently joined to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(channel).map(|s| s.receiver_count()))
            .unwrap_or(0)
    }

    /// Number of channels with a live sender.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().map(|channels| channels.len()).unwrap_or(0)
    }

    /// Drop channels nobody listens to any more.
    pub fn prune(&self) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.retain(|_, sender| sender.receiver_count() > 0);
        }
    }
}

#[async_trait]
impl ChannelServer for RealtimeHub {
    async fn emit(
        &self,
        channel: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> NotifierResult<()> {
        let sender = {
            let channels = self
                .channels
                .lock()
                .map_err(|_| NotifierError::Realtime("channel registry poisoned".to_string()))?;
            channels.get(channel).cloned()
        };

        let Some(sender) = sender else {
            tracing::debug!(channel, event, "No subscribers on channel");
            return Ok(());
        };

        let message = RealtimeMessage {
            channel: channel.to_string(),
            event: event.to_string(),
            data: payload.clone(),
        };
        // Err only means every receiver has gone away since the lookup.
        let delivered = sender.send(message).unwrap_or(0);
        tracing::debug!(channel, event, delivered, "Emitted real-time event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let hub = RealtimeHub::new();
        let mut rx = hub.subscribe("student:S1").unwrap();

        hub.emit("student:S1", NOTIFICATION_CREATED, &serde_json::json!({"n": 1}))
            .await
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.channel, "student:S1");
        assert_eq!(message.event, NOTIFICATION_CREATED);
        assert_eq!(message.data["n"], 1);
    }

    #[tokio::test]
    async fn test_emit_is_scoped_to_channel() {
        let hub = RealtimeHub::new();
        let mut other = hub.subscribe("student:S2").unwrap();

        hub.emit("student:S1", NOTIFICATION_CREATED, &serde_json::Value::Null)
            .await
            .unwrap();

        assert!(matches!(
            other.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_ok() {
        let hub = RealtimeHub::new();
        hub.emit("branch:B1", NOTIFICATION_CREATED, &serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(hub.subscriber_count("branch:B1"), 0);
    }

    #[test]
    fn test_prune_drops_idle_channels() {
        let hub = RealtimeHub::new();
        let rx = hub.subscribe("institution:I1").unwrap();
        assert_eq!(hub.subscriber_count("institution:I1"), 1);

        drop(rx);
        hub.prune();
        assert_eq!(hub.subscriber_count("institution:I1"), 0);
    }

    #[test]
    fn test_handle_is_empty_until_installed() {
        let handle = ChannelServerHandle::new();
        assert!(handle.active().is_none());

        handle.install(Arc::new(RealtimeHub::new()));
        assert!(handle.active().is_some());

        handle.clear();
        assert!(handle.active().is_none());
    }
}
