//! In-memory fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use herald_common::types::{EmailMessage, NotificationPayload, NotificationRecord};

use crate::buffer::{NotificationBuffer, PoppedItem};
use crate::email::EmailSender;
use crate::error::{NotifierError, NotifierResult};
use crate::flush::DeadLetterSink;
use crate::realtime::ChannelServer;
use crate::store::{InsertSummary, NotificationStore};

pub fn payload(recipient_type: &str) -> NotificationPayload {
    NotificationPayload {
        title: "New enquiry".to_string(),
        description: "A new enquiry was submitted".to_string(),
        category: Some("enquiry".to_string()),
        recipient_type: recipient_type.to_string(),
        student: None,
        institution: None,
        branch: None,
        institution_admin: None,
        metadata: serde_json::json!({}),
    }
}

pub fn student_payload(student: &str) -> NotificationPayload {
    let mut p = payload("STUDENT");
    p.student = Some(student.to_string());
    p
}

fn transport_down() -> NotifierError {
    NotifierError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    )))
}

#[derive(Default)]
pub struct MemoryBuffer {
    items: Mutex<VecDeque<String>>,
    fail_pushes: AtomicBool,
    fail_pops: AtomicBool,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_raw(&self, value: String) {
        self.items.lock().unwrap().push_back(value);
    }

    pub fn items(&self) -> Vec<String> {
        self.items.lock().unwrap().iter().cloned().collect()
    }

    pub fn fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pops(&self, fail: bool) {
        self.fail_pops.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationBuffer for MemoryBuffer {
    async fn push(&self, value: &str) -> NotifierResult<()> {
        if self.fail_pushes.load(Ordering::SeqCst) {
            return Err(transport_down());
        }
        self.push_raw(value.to_string());
        Ok(())
    }

    async fn pop_batch(&self, max: usize) -> NotifierResult<Vec<PoppedItem>> {
        if self.fail_pops.load(Ordering::SeqCst) {
            return Err(transport_down());
        }
        let mut items = self.items.lock().unwrap();
        Ok((0..max).map(|_| Ok(items.pop_front())).collect())
    }

    async fn len(&self) -> NotifierResult<u64> {
        Ok(self.items.lock().unwrap().len() as u64)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<NotificationRecord>>,
    fail_writes: AtomicBool,
    insert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_many(&self, records: &[NotificationRecord]) -> NotifierResult<InsertSummary> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(NotifierError::Database(sqlx::Error::PoolTimedOut));
        }
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(InsertSummary {
            inserted: records.len() as u64,
            failed: Vec::new(),
        })
    }

    async fn create(&self, record: &NotificationRecord) -> NotifierResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(NotifierError::Database(sqlx::Error::PoolTimedOut));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Channel server whose every emit fails.
pub struct FailingChannelServer;

#[async_trait]
impl ChannelServer for FailingChannelServer {
    async fn emit(
        &self,
        _channel: &str,
        _event: &str,
        _payload: &serde_json::Value,
    ) -> NotifierResult<()> {
        Err(NotifierError::Realtime("socket server crashed".to_string()))
    }
}

#[derive(Default)]
pub struct RecordingDeadLetter {
    records: Mutex<Vec<NotificationRecord>>,
}

impl RecordingDeadLetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetter {
    async fn dead_letter(&self, records: &[NotificationRecord], _reason: &str) {
        self.records.lock().unwrap().extend_from_slice(records);
    }
}

#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
    fail_sends: AtomicBool,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, email: &EmailMessage) -> NotifierResult<Option<String>> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(NotifierError::Email("provider unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(Some(format!("msg-{}", self.sent.lock().unwrap().len())))
    }

    fn name(&self) -> &'static str {
        "Recording"
    }
}
