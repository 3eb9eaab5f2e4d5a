//! Job definitions: options, backoff policy and the persisted job record.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay policy between attempts of a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
    /// `delay_ms * 2^(attempt - 1)`: 2s, 4s, 8s for a 2000 ms base.
    Exponential { delay_ms: u64 },
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn exponential(initial: Duration) -> Self {
        Backoff::Exponential {
            delay_ms: initial.as_millis() as u64,
        }
    }

    /// Delay before the next attempt, given how many attempts have already failed.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { delay_ms } => {
                let exponent = attempts_made.saturating_sub(1).min(32);
                Duration::from_millis(delay_ms.saturating_mul(1u64 << exponent))
            }
        }
    }
}

/// Per-job settings, persisted with the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Total attempts including the first run (default: 1).
    pub attempts: u32,
    pub backoff: Option<Backoff>,
    /// Delay before the job becomes runnable.
    #[serde(default)]
    pub delay_ms: u64,
    /// Explicit id; adding a job whose id already exists is a no-op.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Keep only the last N completed jobs (`None` keeps all, `Some(0)` removes immediately).
    #[serde(default)]
    pub remove_on_complete: Option<u64>,
    /// Keep only the last N failed jobs.
    #[serde(default)]
    pub remove_on_fail: Option<u64>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: None,
            delay_ms: 0,
            job_id: None,
            remove_on_complete: None,
            remove_on_fail: None,
        }
    }
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn keep_completed(mut self, count: u64) -> Self {
        self.remove_on_complete = Some(count);
        self
    }

    pub fn keep_failed(mut self, count: u64) -> Self {
        self.remove_on_fail = Some(count);
        self
    }

    /// Delay before retrying after `attempts_made` failures, or `None` when attempts are exhausted.
    pub fn retry_delay(&self, attempts_made: u32) -> Option<Duration> {
        if attempts_made >= self.attempts {
            return None;
        }
        Some(
            self.backoff
                .map(|b| b.delay_for(attempts_made))
                .unwrap_or(Duration::ZERO),
        )
    }
}

/// Lifecycle state of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

/// A job as stored in Redis under `<prefix>:<queue>:job:<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    pub data: serde_json::Value,
    pub opts: JobOptions,
    pub state: JobState,
    #[serde(default)]
    pub attempts_made: u32,
    /// Creation time, unix millis.
    pub timestamp: i64,
    #[serde(default)]
    pub processed_on: Option<i64>,
    #[serde(default)]
    pub finished_on: Option<i64>,
    #[serde(default)]
    pub failed_reason: Option<String>,
    /// Set on jobs spawned by a repeatable definition.
    #[serde(default)]
    pub repeat_key: Option<String>,
}

/// Job view handed to processors, with typed data.
#[derive(Debug, Clone)]
pub struct Job<T> {
    pub id: String,
    pub name: String,
    pub data: T,
    /// Failed attempts before this run.
    pub attempts_made: u32,
    pub timestamp: i64,
}

/// Handle returned by `Queue::add`. The job may not have run yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: String,
    pub name: String,
    pub queue: String,
    /// `true` when a job with the same id already existed and nothing was added.
    pub deduplicated: bool,
}

/// Schedule for a repeatable job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatOptions {
    pub every: Duration,
}

impl RepeatOptions {
    pub fn every(every: Duration) -> Self {
        Self { every }
    }
}

/// A registered repeatable job definition, stored in the `repeat` hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatableJob {
    pub key: String,
    pub name: String,
    pub every_ms: u64,
    /// Next slot, unix millis, aligned to `every_ms`.
    pub next_run_ms: i64,
    pub data: serde_json::Value,
    pub opts: JobOptions,
}

impl RepeatableJob {
    pub fn key_for(name: &str, every_ms: u64) -> String {
        format!("{}::{}", name, every_ms)
    }

    /// First interval boundary strictly after `now_ms`.
    pub fn next_slot(now_ms: i64, every_ms: u64) -> i64 {
        let every = every_ms as i64;
        (now_ms / every + 1) * every
    }

    /// Job id for the run scheduled at `slot_ms`; dedups concurrent schedulers.
    pub fn slot_job_id(&self, slot_ms: i64) -> String {
        format!("repeat:{}:{}", self.key, slot_ms)
    }
}

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}
