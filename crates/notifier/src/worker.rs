//! Notification worker: the only place a notification becomes a record.
//!
//! Per job:
//! 1. Materialize the payload into a `NotificationRecord` (fresh id, one timestamp)
//! 2. Emit `notificationCreated` to the recipient's channel (best effort)
//! 3. Append the serialized record to the write-behind buffer
//! 4. If the append fails, write the record straight to the store; if that
//!    fails too, log and drop it
//!
//! Only a failure before the buffer step fails the job. Once the record has
//! been emitted the job always completes, since a retry would emit it again.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use herald_common::types::{NotificationPayload, NotificationRecord};
use herald_queue::{Job, Processor};

use crate::buffer::NotificationBuffer;
use crate::error::NotifierResult;
use crate::realtime::{ChannelServerHandle, NOTIFICATION_CREATED};
use crate::store::NotificationStore;

/// Body of the `notificationCreated` event.
#[derive(Serialize)]
struct NotificationCreated<'a> {
    notification: &'a NotificationRecord,
}

/// Where the record ended up after the buffer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Buffered,
    /// Buffer append failed; the record was written directly to the store.
    Fallback,
    /// Buffer append and direct write both failed.
    Dropped,
}

/// Result of handling one notification job.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub record: NotificationRecord,
    /// Channel the event was delivered to, if any.
    pub emitted_to: Option<String>,
    pub persistence: Persistence,
}

pub struct NotificationProcessor {
    channels: ChannelServerHandle,
    buffer: Arc<dyn NotificationBuffer>,
    store: Arc<dyn NotificationStore>,
}

impl NotificationProcessor {
    pub fn new(
        channels: ChannelServerHandle,
        buffer: Arc<dyn NotificationBuffer>,
        store: Arc<dyn NotificationStore>,
    ) -> Self {
        Self {
            channels,
            buffer,
            store,
        }
    }

    pub async fn handle(&self, payload: NotificationPayload) -> NotifierResult<Dispatch> {
        let record = NotificationRecord::materialize(payload);
        let serialized = serde_json::to_string(&record)?;

        let emitted_to = self.fan_out(&record).await;
        let persistence = self.persist(&record, &serialized).await;

        Ok(Dispatch {
            record,
            emitted_to,
            persistence,
        })
    }

    /// Publish the record to its recipient channel. Never fails.
    async fn fan_out(&self, record: &NotificationRecord) -> Option<String> {
        let Some(recipient) = record.payload.recipient() else {
            debug!(
                id = %record.id,
                recipient_type = %record.payload.recipient_type,
                "No addressable recipient, skipping real-time emit"
            );
            return None;
        };

        let Some(server) = self.channels.active() else {
            warn!(id = %record.id, "Real-time server not available, skipping emit");
            return None;
        };

        let channel = recipient.channel_name();
        let body = match serde_json::to_value(NotificationCreated {
            notification: record,
        }) {
            Ok(body) => body,
            Err(e) => {
                error!(id = %record.id, error = %e, "Failed to encode real-time event");
                return None;
            }
        };

        match server.emit(&channel, NOTIFICATION_CREATED, &body).await {
            Ok(()) => {
                debug!(id = %record.id, channel = %channel, "Notification emitted");
                Some(channel)
            }
            Err(e) => {
                error!(id = %record.id, channel = %channel, error = %e, "Real-time emit failed");
                None
            }
        }
    }

    async fn persist(&self, record: &NotificationRecord, serialized: &str) -> Persistence {
        let buffer_error = match self.buffer.push(serialized).await {
            Ok(()) => return Persistence::Buffered,
            Err(e) => e,
        };

        warn!(
            id = %record.id,
            error = %buffer_error,
            "Buffer append failed, writing notification directly"
        );

        match self.store.create(record).await {
            Ok(()) => {
                info!(id = %record.id, "Notification stored via fallback");
                Persistence::Fallback
            }
            Err(e) => {
                error!(
                    id = %record.id,
                    buffer_error = %buffer_error,
                    error = %e,
                    "Fallback write failed, notification dropped"
                );
                Persistence::Dropped
            }
        }
    }
}

#[async_trait]
impl Processor for NotificationProcessor {
    type Data = NotificationPayload;
    type Error = crate::error::NotifierError;

    async fn process(&self, job: &Job<Self::Data>) -> Result<(), Self::Error> {
        let dispatch = self.handle(job.data.clone()).await?;
        debug!(
            job_id = %job.id,
            id = %dispatch.record.id,
            persistence = ?dispatch.persistence,
            "Notification job processed"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "NotificationProcessor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FailingChannelServer, MemoryBuffer, MemoryStore, payload, student_payload,
    };
    use crate::realtime::{ChannelServer, RealtimeHub};

    fn processor(
        channels: &ChannelServerHandle,
        buffer: &Arc<MemoryBuffer>,
        store: &Arc<MemoryStore>,
    ) -> NotificationProcessor {
        NotificationProcessor::new(channels.clone(), buffer.clone(), store.clone())
    }

    fn hub_handle() -> (ChannelServerHandle, Arc<RealtimeHub>) {
        let hub = Arc::new(RealtimeHub::new());
        let handle = ChannelServerHandle::new();
        handle.install(hub.clone() as Arc<dyn ChannelServer>);
        (handle, hub)
    }

    #[tokio::test]
    async fn test_student_notification_is_emitted_and_buffered() {
        let (channels, hub) = hub_handle();
        let mut rx = hub.subscribe("student:S1").unwrap();
        let buffer = Arc::new(MemoryBuffer::new());
        let store = Arc::new(MemoryStore::new());

        let dispatch = processor(&channels, &buffer, &store)
            .handle(student_payload("S1"))
            .await
            .unwrap();

        assert_eq!(dispatch.emitted_to.as_deref(), Some("student:S1"));
        assert_eq!(dispatch.persistence, Persistence::Buffered);

        let message = rx.recv().await.unwrap();
        assert_eq!(message.event, NOTIFICATION_CREATED);
        let live: NotificationRecord =
            serde_json::from_value(message.data["notification"].clone()).unwrap();

        let items = buffer.items();
        assert_eq!(items.len(), 1);
        let buffered: NotificationRecord = serde_json::from_str(&items[0]).unwrap();

        assert_eq!(live, dispatch.record);
        assert_eq!(buffered, dispatch.record);
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_recipient_type_is_not_emitted() {
        let (channels, hub) = hub_handle();
        let mut rx = hub.subscribe("parent:P1").unwrap();
        let buffer = Arc::new(MemoryBuffer::new());
        let store = Arc::new(MemoryStore::new());

        let mut p = payload("PARENT");
        p.student = Some("P1".to_string());
        let dispatch = processor(&channels, &buffer, &store)
            .handle(p)
            .await
            .unwrap();

        assert!(dispatch.emitted_to.is_none());
        assert!(rx.try_recv().is_err());
        assert_eq!(buffer.items().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_reference_is_not_emitted() {
        let (channels, _hub) = hub_handle();
        let buffer = Arc::new(MemoryBuffer::new());
        let store = Arc::new(MemoryStore::new());

        let dispatch = processor(&channels, &buffer, &store)
            .handle(payload("BRANCH"))
            .await
            .unwrap();

        assert!(dispatch.emitted_to.is_none());
        assert_eq!(dispatch.persistence, Persistence::Buffered);
    }

    #[tokio::test]
    async fn test_absent_channel_server_still_buffers() {
        let channels = ChannelServerHandle::new();
        let buffer = Arc::new(MemoryBuffer::new());
        let store = Arc::new(MemoryStore::new());

        let dispatch = processor(&channels, &buffer, &store)
            .handle(student_payload("S1"))
            .await
            .unwrap();

        assert!(dispatch.emitted_to.is_none());
        assert_eq!(buffer.items().len(), 1);
    }

    #[tokio::test]
    async fn test_emit_failure_does_not_fail_job() {
        let channels = ChannelServerHandle::new();
        channels.install(Arc::new(FailingChannelServer));
        let buffer = Arc::new(MemoryBuffer::new());
        let store = Arc::new(MemoryStore::new());
        let processor = processor(&channels, &buffer, &store);

        let job = Job {
            id: "1".to_string(),
            name: "create".to_string(),
            data: student_payload("S1"),
            attempts_made: 0,
            timestamp: 0,
        };
        processor.process(&job).await.unwrap();

        assert_eq!(buffer.items().len(), 1);
    }

    #[tokio::test]
    async fn test_buffer_failure_falls_back_to_store() {
        let (channels, _hub) = hub_handle();
        let buffer = Arc::new(MemoryBuffer::new());
        buffer.fail_pushes(true);
        let store = Arc::new(MemoryStore::new());

        let dispatch = processor(&channels, &buffer, &store)
            .handle(student_payload("S1"))
            .await
            .unwrap();

        assert_eq!(dispatch.persistence, Persistence::Fallback);
        assert_eq!(store.records(), vec![dispatch.record]);
        assert!(buffer.items().is_empty());
    }

    #[tokio::test]
    async fn test_double_failure_drops_without_error() {
        let (channels, _hub) = hub_handle();
        let buffer = Arc::new(MemoryBuffer::new());
        buffer.fail_pushes(true);
        let store = Arc::new(MemoryStore::new());
        store.fail_writes(true);

        let dispatch = processor(&channels, &buffer, &store)
            .handle(student_payload("S1"))
            .await
            .unwrap();

        assert_eq!(dispatch.persistence, Persistence::Dropped);
        assert!(store.records().is_empty());
    }
}
