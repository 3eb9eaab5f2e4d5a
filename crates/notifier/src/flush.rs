//! Periodic flush of the write-behind buffer into Postgres.
//!
//! `FlushScheduler` keeps exactly one repeatable `flushDB` job on the
//! `flush-notifications` queue. `FlushProcessor` handles each tick: it drains
//! up to `MAX_FLUSH_BATCH` items in one round trip, skips entries that do not
//! parse and bulk-inserts the rest. Popped items are never pushed back; records
//! that could not be inserted go to the `DeadLetterSink`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::IgnoredAny;
use tracing::{debug, error, info, warn};

use herald_common::types::NotificationRecord;
use herald_queue::{Job, JobOptions, Processor, Queue, RepeatOptions, RepeatableJob};

use crate::buffer::NotificationBuffer;
use crate::error::NotifierResult;
use crate::store::NotificationStore;

pub const FLUSH_QUEUE: &str = "flush-notifications";
pub const FLUSH_JOB: &str = "flushDB";

/// Hard cap on items drained per tick.
pub const MAX_FLUSH_BATCH: usize = 1000;

/// Receives records that were popped from the buffer but could not be stored.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, records: &[NotificationRecord], reason: &str);
}

/// Default sink: the records are logged and discarded.
pub struct LoggingDeadLetter;

#[async_trait]
impl DeadLetterSink for LoggingDeadLetter {
    async fn dead_letter(&self, records: &[NotificationRecord], reason: &str) {
        for record in records {
            error!(
                id = %record.id,
                recipient_type = %record.payload.recipient_type,
                reason,
                "Notification lost during flush"
            );
        }
    }
}

pub struct FlushScheduler {
    queue: Queue,
    every: Duration,
}

impl FlushScheduler {
    pub fn new(queue: Queue, every: Duration) -> Self {
        Self { queue, every }
    }

    /// Remove every registered repeatable job on the flush queue, then register
    /// a single `flushDB` schedule. Safe to call on every start.
    pub async fn schedule_recurring_flush(&self) -> NotifierResult<RepeatableJob> {
        for existing in self.queue.repeatable_jobs().await? {
            if self.queue.remove_repeatable_by_key(&existing.key).await? {
                debug!(key = %existing.key, "Removed stale flush schedule");
            }
        }

        let definition = self
            .queue
            .add_repeatable(
                FLUSH_JOB,
                &serde_json::json!({}),
                RepeatOptions::every(self.every),
                JobOptions::new().keep_completed(10).keep_failed(50),
            )
            .await?;

        info!(
            key = %definition.key,
            every_ms = definition.every_ms,
            next_run_ms = definition.next_run_ms,
            "Recurring flush scheduled"
        );
        Ok(definition)
    }
}

/// Counters for one flush tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub popped: usize,
    pub malformed: usize,
    pub inserted: u64,
    pub lost: usize,
}

pub struct FlushProcessor {
    buffer: Arc<dyn NotificationBuffer>,
    store: Arc<dyn NotificationStore>,
    dead_letter: Arc<dyn DeadLetterSink>,
    batch_size: usize,
}

impl FlushProcessor {
    pub fn new(buffer: Arc<dyn NotificationBuffer>, store: Arc<dyn NotificationStore>) -> Self {
        Self {
            buffer,
            store,
            dead_letter: Arc::new(LoggingDeadLetter),
            batch_size: MAX_FLUSH_BATCH,
        }
    }

    pub fn with_dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = sink;
        self
    }

    /// Lower the per-tick batch. Values above `MAX_FLUSH_BATCH` are clamped.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_FLUSH_BATCH);
        self
    }

    /// Drain one batch into the store. Never fails: every error is logged.
    pub async fn flush(&self) -> FlushReport {
        let mut report = FlushReport::default();

        let popped = match self.buffer.pop_batch(self.batch_size).await {
            Ok(popped) => popped,
            Err(e) => {
                error!(error = %e, "Failed to drain notification buffer");
                return report;
            }
        };

        let mut records = Vec::with_capacity(popped.len());
        for item in popped {
            match item {
                Ok(Some(raw)) if !raw.is_empty() => {
                    report.popped += 1;
                    match serde_json::from_str::<NotificationRecord>(&raw) {
                        Ok(record) => records.push(record),
                        Err(e) => {
                            report.malformed += 1;
                            warn!(error = %e, "Skipping malformed buffered notification");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Buffer pop returned an error"),
            }
        }

        if records.is_empty() {
            debug!(popped = report.popped, "Nothing to flush");
            return report;
        }

        match self.store.insert_many(&records).await {
            Ok(summary) => {
                report.inserted = summary.inserted;
                if !summary.failed.is_empty() {
                    let lost: Vec<NotificationRecord> = records
                        .into_iter()
                        .filter(|r| summary.failed.contains(&r.id))
                        .collect();
                    report.lost = lost.len();
                    self.dead_letter.dead_letter(&lost, "insert failed").await;
                }
            }
            Err(e) => {
                error!(error = %e, count = records.len(), "Flush insert failed");
                report.lost = records.len();
                self.dead_letter.dead_letter(&records, &e.to_string()).await;
            }
        }

        info!(
            popped = report.popped,
            malformed = report.malformed,
            inserted = report.inserted,
            lost = report.lost,
            "Notification buffer flushed"
        );
        report
    }
}

#[async_trait]
impl Processor for FlushProcessor {
    /// The flush job is a trigger; its payload is ignored.
    type Data = IgnoredAny;
    type Error = std::convert::Infallible;

    async fn process(&self, _job: &Job<Self::Data>) -> Result<(), Self::Error> {
        self.flush().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "FlushProcessor"
    }
}
