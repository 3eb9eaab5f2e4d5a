//! Worker loop: leases jobs from a queue and runs them through a `Processor`.
//!
//! - Concurrency is bounded by a semaphore (`WorkerOptions::concurrency`)
//! - Job starts are rate limited by a token bucket (`WorkerOptions::limiter`)
//! - Failed jobs are retried per their `JobOptions` (attempts + backoff)
//! - Active jobs hold a lease that is renewed while they run; expired leases
//!   are requeued by the stalled-job check
//! - Repeatable definitions are promoted into jobs on every poll

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::DefaultDirectRateLimiter;
use serde::de::DeserializeOwned;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::QueueResult;
use crate::job::{Job, JobRecord};
use crate::limiter::RateLimit;
use crate::queue::Queue;

/// Handles jobs of one queue.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Job payload type, decoded from the stored JSON.
    type Data: DeserializeOwned + Send + Sync + 'static;
    type Error: std::fmt::Display + Send + 'static;

    /// Run one job. `Err` triggers a retry while attempts remain.
    async fn process(&self, job: &Job<Self::Data>) -> Result<(), Self::Error>;

    /// Processor name for logging.
    fn name(&self) -> &'static str;
}

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Jobs processed simultaneously (default: 1).
    pub concurrency: usize,
    /// Optional cap on job starts per window.
    pub limiter: Option<RateLimit>,
    /// Sleep between polls when the queue is empty (default: 500 ms).
    pub poll_interval: Duration,
    /// Lease held on an active job; renewed at half this period (default: 30 s).
    pub lock_duration: Duration,
    /// How often expired leases are requeued (default: 30 s).
    pub stalled_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            limiter: None,
            poll_interval: Duration::from_millis(500),
            lock_duration: Duration::from_secs(30),
            stalled_interval: Duration::from_secs(30),
        }
    }
}

impl WorkerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_limiter(mut self, limiter: RateLimit) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_lock_duration(mut self, lock: Duration) -> Self {
        self.lock_duration = lock;
        self
    }

    pub fn with_stalled_interval(mut self, interval: Duration) -> Self {
        self.stalled_interval = interval;
        self
    }
}

/// Outcome of a single processed job, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retrying { delay: Duration },
    Failed,
}

/// Generic worker bound to one queue and one processor.
pub struct Worker<P: Processor> {
    queue: Queue,
    processor: Arc<P>,
    options: WorkerOptions,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    semaphore: Arc<Semaphore>,
}

impl<P: Processor> Worker<P> {
    pub fn new(queue: Queue, processor: Arc<P>, options: WorkerOptions) -> QueueResult<Self> {
        let limiter = options
            .limiter
            .map(|limit| limit.build().map(Arc::new))
            .transpose()?;
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));

        Ok(Self {
            queue,
            processor,
            options,
            limiter,
            semaphore,
        })
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Run until `shutdown` flips to `true`, then wait for in-flight jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        info!(
            queue = %self.queue.name(),
            processor = %self.processor.name(),
            concurrency = self.options.concurrency,
            rate_limit = ?self.options.limiter,
            "Starting worker"
        );

        let mut in_flight = JoinSet::new();
        let mut last_stalled_check = tokio::time::Instant::now();
        let mut fetch_errors = FetchBackoff::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Reap finished tasks so the set does not grow unbounded.
            while in_flight.try_join_next().is_some() {}

            if last_stalled_check.elapsed() >= self.options.stalled_interval {
                if let Err(e) = self.queue.recover_stalled().await {
                    debug!(queue = %self.queue.name(), error = %e, "Stalled job check failed");
                }
                last_stalled_check = tokio::time::Instant::now();
            }

            if let Err(e) = self.queue.promote_repeatables().await {
                debug!(queue = %self.queue.name(), error = %e, "Repeatable promotion failed");
            }

            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            if let Some(limiter) = &self.limiter {
                tokio::select! {
                    _ = limiter.until_ready() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            let taken = self.queue.take_next(self.options.lock_duration).await;
            if taken.is_ok() {
                if let Some(errors) = fetch_errors.reset() {
                    info!(queue = %self.queue.name(), "Queue connection recovered after {} errors", errors);
                }
            }

            match taken {
                Ok(Some(record)) => {
                    let queue = self.queue.clone();
                    let processor = self.processor.clone();
                    let lock = self.options.lock_duration;
                    in_flight.spawn(async move {
                        let _permit = permit;
                        run_job(&queue, processor.as_ref(), record, lock).await
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.options.poll_interval) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    drop(permit);
                    let backoff = fetch_errors.record_error();
                    warn!(
                        queue = %self.queue.name(),
                        error = %e,
                        consecutive_errors = fetch_errors.consecutive,
                        backoff_secs = backoff.as_secs(),
                        "Failed to fetch job, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!(
            queue = %self.queue.name(),
            in_flight = in_flight.len(),
            "Shutdown requested, waiting for in-flight jobs"
        );
        while in_flight.join_next().await.is_some() {}
        info!(queue = %self.queue.name(), "Worker stopped");
        Ok(())
    }

    /// Lease and run a single job inline, bypassing the concurrency and rate
    /// limits. Returns `None` when nothing is runnable.
    pub async fn process_one(&self) -> QueueResult<Option<JobOutcome>> {
        self.queue.promote_repeatables().await?;
        match self.queue.take_next(self.options.lock_duration).await? {
            Some(record) => Ok(Some(
                run_job(&self.queue, self.processor.as_ref(), record, self.options.lock_duration)
                    .await,
            )),
            None => Ok(None),
        }
    }
}

/// Exponential backoff between failed fetches, capped at 30 s.
#[derive(Debug, Default)]
struct FetchBackoff {
    consecutive: u32,
}

impl FetchBackoff {
    const MAX_BACKOFF_SECS: u64 = 30;

    fn record_error(&mut self) -> Duration {
        self.consecutive += 1;
        let secs = std::cmp::min(2u64.pow(self.consecutive.min(5)), Self::MAX_BACKOFF_SECS);
        Duration::from_secs(secs)
    }

    /// Clear the streak after any successful fetch, empty or not. Returns the
    /// length of the streak that just ended.
    fn reset(&mut self) -> Option<u32> {
        (self.consecutive > 0).then(|| std::mem::take(&mut self.consecutive))
    }
}

/// Process one leased job and record the outcome in the queue.
async fn run_job<P: Processor>(
    queue: &Queue,
    processor: &P,
    mut record: JobRecord,
    lock: Duration,
) -> JobOutcome {
    let data = match serde_json::from_value::<P::Data>(record.data.clone()) {
        Ok(data) => data,
        Err(e) => {
            // Undecodable payloads would fail identically on every attempt.
            let reason = format!("invalid job data: {}", e);
            error!(queue = %queue.name(), job_id = %record.id, error = %reason, "Job failed permanently");
            if let Err(e) = queue.fail(record, reason).await {
                error!(queue = %queue.name(), error = %e, "Failed to record job failure");
            }
            return JobOutcome::Failed;
        }
    };

    let job = Job {
        id: record.id.clone(),
        name: record.name.clone(),
        data,
        attempts_made: record.attempts_made,
        timestamp: record.timestamp,
    };

    let result = {
        let work = processor.process(&job);
        tokio::pin!(work);
        let mut heartbeat = tokio::time::interval((lock / 2).max(Duration::from_millis(1)));
        heartbeat.tick().await;
        loop {
            tokio::select! {
                result = &mut work => break result,
                _ = heartbeat.tick() => {
                    if let Err(e) = queue.extend_lease(&job.id, lock).await {
                        warn!(queue = %queue.name(), job_id = %job.id, error = %e, "Failed to extend job lease");
                    }
                }
            }
        }
    };

    match result {
        Ok(()) => {
            debug!(queue = %queue.name(), job_id = %job.id, processor = %processor.name(), "Job completed");
            if let Err(e) = queue.complete(record).await {
                error!(queue = %queue.name(), job_id = %job.id, error = %e, "Failed to mark job completed");
            }
            JobOutcome::Completed
        }
        Err(e) => {
            let reason = e.to_string();
            record.attempts_made += 1;
            match record.opts.retry_delay(record.attempts_made) {
                Some(delay) => {
                    warn!(
                        queue = %queue.name(),
                        job_id = %job.id,
                        attempt = record.attempts_made,
                        max_attempts = record.opts.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Job failed, scheduling retry"
                    );
                    if let Err(e) = queue.retry(record, reason, delay).await {
                        error!(queue = %queue.name(), job_id = %job.id, error = %e, "Failed to schedule retry");
                    }
                    JobOutcome::Retrying { delay }
                }
                None => {
                    error!(
                        queue = %queue.name(),
                        job_id = %job.id,
                        attempts = record.attempts_made,
                        error = %reason,
                        "Job failed, attempts exhausted"
                    );
                    if let Err(e) = queue.fail(record, reason).await {
                        error!(queue = %queue.name(), job_id = %job.id, error = %e, "Failed to record job failure");
                    }
                    JobOutcome::Failed
                }
            }
        }
    }
}
