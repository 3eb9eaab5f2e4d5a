//! Enqueue side of the notification and email pipelines.
//!
//! Producers only add a job and return its handle. No record is created, no
//! event is emitted and nothing is written to the database on this path.

use std::time::Duration;

use herald_common::types::{EmailMessage, NotificationPayload};
use herald_queue::{Backoff, JobHandle, JobOptions, Queue};

use crate::error::NotifierResult;

pub const NOTIFICATION_QUEUE: &str = "notifications";
pub const CREATE_JOB: &str = "create";

pub const EMAIL_QUEUE: &str = "emails";
pub const SEND_JOB: &str = "send";

/// 3 attempts, exponential backoff from 2 s (2 s, 4 s), keep the last 100
/// completed and 500 failed jobs.
pub fn notification_job_options() -> JobOptions {
    JobOptions::new()
        .with_attempts(3)
        .with_backoff(Backoff::exponential(Duration::from_millis(2000)))
        .keep_completed(100)
        .keep_failed(500)
}

/// 3 attempts, exponential backoff from 5 s.
pub fn email_job_options() -> JobOptions {
    JobOptions::new()
        .with_attempts(3)
        .with_backoff(Backoff::exponential(Duration::from_millis(5000)))
}

#[derive(Clone)]
pub struct NotificationProducer {
    queue: Queue,
}

impl NotificationProducer {
    pub fn new(queue: Queue) -> Self {
        Self { queue }
    }

    /// Queue a `create` job for `payload`. Returns once the job is stored.
    pub async fn enqueue_notification(
        &self,
        payload: &NotificationPayload,
    ) -> NotifierResult<JobHandle> {
        let handle = self
            .queue
            .add(CREATE_JOB, payload, notification_job_options())
            .await?;
        tracing::debug!(
            job_id = %handle.id,
            recipient_type = %payload.recipient_type,
            "Notification job enqueued"
        );
        Ok(handle)
    }
}

#[derive(Clone)]
pub struct EmailProducer {
    queue: Queue,
}

impl EmailProducer {
    pub fn new(queue: Queue) -> Self {
        Self { queue }
    }

    /// Queue a `send` job for `email`.
    pub async fn enqueue_email_job(&self, email: &EmailMessage) -> NotifierResult<JobHandle> {
        let handle = self.queue.add(SEND_JOB, email, email_job_options()).await?;
        tracing::debug!(job_id = %handle.id, to = %email.to, "Email job enqueued");
        Ok(handle)
    }
}
