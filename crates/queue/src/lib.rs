//! Durable job queue on Redis.
//!
//! Named queues with at-least-once delivery: retries with fixed or exponential
//! backoff, delayed jobs, repeatable (interval) jobs, job-id deduplication,
//! bounded retention of finished jobs and stalled-job recovery.

pub mod error;
pub mod job;
pub mod keys;
pub mod limiter;
pub mod queue;
mod scripts;
pub mod worker;

pub use error::{QueueError, QueueResult};
pub use job::{
    Backoff, Job, JobCounts, JobHandle, JobOptions, JobRecord, JobState, RepeatOptions,
    RepeatableJob,
};
pub use limiter::RateLimit;
pub use queue::Queue;
pub use worker::{JobOutcome, Processor, Worker, WorkerOptions};
