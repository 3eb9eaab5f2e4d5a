//! Client side of a named queue: adding jobs, repeatable schedules and introspection.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::{JobCounts, JobHandle, JobOptions, JobRecord, JobState, RepeatOptions, RepeatableJob};
use crate::keys::QueueKeys;
use crate::scripts;

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A named durable queue stored in Redis.
///
/// Cloning is cheap: clones share the underlying `ConnectionManager`.
#[derive(Clone)]
pub struct Queue {
    redis: ConnectionManager,
    keys: QueueKeys,
}

impl Queue {
    pub fn new(redis: ConnectionManager, prefix: &str, name: &str) -> Self {
        Self {
            redis,
            keys: QueueKeys::new(prefix, name),
        }
    }

    pub fn name(&self) -> &str {
        self.keys.queue()
    }

    /// Enqueue a job. Returns as soon as the job is stored; it runs later on a worker.
    pub async fn add<T: Serialize>(
        &self,
        name: &str,
        data: &T,
        opts: JobOptions,
    ) -> QueueResult<JobHandle> {
        let data = serde_json::to_value(data)?;
        self.add_raw(name, data, opts, None).await
    }

    async fn add_raw(
        &self,
        name: &str,
        data: serde_json::Value,
        opts: JobOptions,
        repeat_key: Option<String>,
    ) -> QueueResult<JobHandle> {
        let mut conn = self.redis.clone();

        let id = match &opts.job_id {
            Some(id) => id.clone(),
            None => {
                let next: u64 = conn.incr(self.keys.id_counter(), 1u64).await?;
                next.to_string()
            }
        };

        let now = now_ms();
        let ready_at = if opts.delay_ms > 0 {
            now + opts.delay_ms as i64
        } else {
            0
        };

        let record = JobRecord {
            id: id.clone(),
            name: name.to_string(),
            data,
            opts,
            state: if ready_at > 0 {
                JobState::Delayed
            } else {
                JobState::Waiting
            },
            attempts_made: 0,
            timestamp: now,
            processed_on: None,
            finished_on: None,
            failed_reason: None,
            repeat_key,
        };
        let json = serde_json::to_string(&record)?;

        let added: i64 = scripts::ADD_JOB
            .key(self.keys.job(&id))
            .key(self.keys.wait())
            .key(self.keys.delayed())
            .arg(&id)
            .arg(json)
            .arg(ready_at)
            .invoke_async(&mut conn)
            .await?;

        let deduplicated = added == 0;
        debug!(
            queue = %self.name(),
            job_id = %id,
            job_name = %name,
            deduplicated,
            "Enqueued job"
        );

        Ok(JobHandle {
            id,
            name: name.to_string(),
            queue: self.name().to_string(),
            deduplicated,
        })
    }

    /// Register (or overwrite) a repeatable job. The first run is the next
    /// interval boundary after now.
    pub async fn add_repeatable<T: Serialize>(
        &self,
        name: &str,
        data: &T,
        repeat: RepeatOptions,
        opts: JobOptions,
    ) -> QueueResult<RepeatableJob> {
        let every_ms = repeat.every.as_millis() as u64;
        if every_ms == 0 {
            return Err(QueueError::InvalidRepeat(
                "interval must be greater than zero".to_string(),
            ));
        }

        let definition = RepeatableJob {
            key: RepeatableJob::key_for(name, every_ms),
            name: name.to_string(),
            every_ms,
            next_run_ms: RepeatableJob::next_slot(now_ms(), every_ms),
            data: serde_json::to_value(data)?,
            opts,
        };

        let mut conn = self.redis.clone();
        let _: () = conn
            .hset(
                self.keys.repeat(),
                &definition.key,
                serde_json::to_string(&definition)?,
            )
            .await?;

        info!(
            queue = %self.name(),
            repeat_key = %definition.key,
            every_ms,
            next_run_ms = definition.next_run_ms,
            "Registered repeatable job"
        );
        Ok(definition)
    }

    /// All registered repeatable definitions, sorted by key.
    pub async fn repeatable_jobs(&self) -> QueueResult<Vec<RepeatableJob>> {
        let mut conn = self.redis.clone();
        let raw: HashMap<String, String> = conn.hgetall(self.keys.repeat()).await?;

        let mut definitions: Vec<RepeatableJob> = raw
            .into_iter()
            .filter_map(|(key, json)| match serde_json::from_str(&json) {
                Ok(definition) => Some(definition),
                Err(e) => {
                    warn!(queue = %self.name(), repeat_key = %key, error = %e, "Skipping unreadable repeatable job");
                    None
                }
            })
            .collect();
        definitions.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(definitions)
    }

    /// Remove a repeatable definition. Returns `false` if it did not exist.
    pub async fn remove_repeatable_by_key(&self, key: &str) -> QueueResult<bool> {
        let mut conn = self.redis.clone();
        let removed: i64 = conn.hdel(self.keys.repeat(), key).await?;
        if removed > 0 {
            info!(queue = %self.name(), repeat_key = %key, "Removed repeatable job");
        }
        Ok(removed > 0)
    }

    pub async fn get_job(&self, id: &str) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(self.keys.job(id)).await?;
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(QueueError::from)
    }

    pub async fn counts(&self) -> QueueResult<JobCounts> {
        let mut conn = self.redis.clone();
        let (waiting, delayed, active, completed, failed): (u64, u64, u64, u64, u64) =
            redis::pipe()
                .llen(self.keys.wait())
                .zcard(self.keys.delayed())
                .zcard(self.keys.active())
                .llen(self.keys.completed())
                .llen(self.keys.failed())
                .query_async(&mut conn)
                .await?;

        Ok(JobCounts {
            waiting,
            delayed,
            active,
            completed,
            failed,
        })
    }

    /// Most recently failed jobs, newest first.
    pub async fn failed_jobs(&self, limit: usize) -> QueueResult<Vec<JobRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn
            .lrange(self.keys.failed(), 0, limit as isize - 1)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let job_keys: Vec<String> = ids.iter().map(|id| self.keys.job(id)).collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&job_keys)
            .query_async(&mut conn)
            .await?;

        Ok(raw
            .into_iter()
            .flatten()
            .filter_map(|json| serde_json::from_str(&json).ok())
            .collect())
    }

    /// Lease the next runnable job, promoting due delayed jobs first.
    pub async fn take_next(&self, lease: Duration) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.redis.clone();
        let now = now_ms();

        let taken: Option<(String, String)> = scripts::TAKE_NEXT
            .key(self.keys.wait())
            .key(self.keys.delayed())
            .key(self.keys.active())
            .arg(now)
            .arg(now + lease.as_millis() as i64)
            .arg(self.keys.job_prefix())
            .invoke_async(&mut conn)
            .await?;

        let Some((id, json)) = taken else {
            return Ok(None);
        };

        match serde_json::from_str::<JobRecord>(&json) {
            Ok(mut record) => {
                record.state = JobState::Active;
                record.processed_on = Some(now);
                Ok(Some(record))
            }
            Err(e) => {
                warn!(queue = %self.name(), job_id = %id, error = %e, "Dropping unreadable job record");
                let _: () = redis::pipe()
                    .zrem(self.keys.active(), &id)
                    .ignore()
                    .del(self.keys.job(&id))
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok(None)
            }
        }
    }

    pub(crate) async fn complete(&self, mut record: JobRecord) -> QueueResult<()> {
        record.state = JobState::Completed;
        record.finished_on = Some(now_ms());
        let keep = record.opts.remove_on_complete;
        self.finish(record, self.keys.completed(), keep).await
    }

    pub(crate) async fn fail(&self, mut record: JobRecord, reason: String) -> QueueResult<()> {
        record.state = JobState::Failed;
        record.finished_on = Some(now_ms());
        record.failed_reason = Some(reason);
        let keep = record.opts.remove_on_fail;
        self.finish(record, self.keys.failed(), keep).await
    }

    async fn finish(&self, record: JobRecord, list: String, keep: Option<u64>) -> QueueResult<()> {
        let mut conn = self.redis.clone();
        let keep = keep.map(|n| n as i64).unwrap_or(-1);

        let _: i64 = scripts::FINISH_JOB
            .key(self.keys.active())
            .key(list)
            .key(self.keys.job(&record.id))
            .arg(&record.id)
            .arg(serde_json::to_string(&record)?)
            .arg(keep)
            .arg(self.keys.job_prefix())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Put a failed job back into the delayed set until `delay` has elapsed.
    pub(crate) async fn retry(
        &self,
        mut record: JobRecord,
        reason: String,
        delay: Duration,
    ) -> QueueResult<()> {
        let mut conn = self.redis.clone();
        record.state = JobState::Delayed;
        record.failed_reason = Some(reason);
        let ready_at = now_ms() + delay.as_millis() as i64;

        let _: i64 = scripts::RETRY_JOB
            .key(self.keys.active())
            .key(self.keys.delayed())
            .key(self.keys.job(&record.id))
            .arg(&record.id)
            .arg(serde_json::to_string(&record)?)
            .arg(ready_at)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Push the lease deadline of an active job forward.
    pub(crate) async fn extend_lease(&self, id: &str, lease: Duration) -> QueueResult<()> {
        let mut conn = self.redis.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(self.keys.active())
            .arg("XX")
            .arg(now_ms() + lease.as_millis() as i64)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Requeue active jobs whose lease expired (their worker died or hung).
    pub async fn recover_stalled(&self) -> QueueResult<u64> {
        let mut conn = self.redis.clone();
        let recovered: u64 = scripts::RECOVER_STALLED
            .key(self.keys.active())
            .key(self.keys.wait())
            .arg(now_ms())
            .invoke_async(&mut conn)
            .await?;

        if recovered > 0 {
            warn!(queue = %self.name(), recovered, "Requeued stalled jobs");
        }
        Ok(recovered)
    }

    /// Enqueue one job for every repeatable definition whose slot is due.
    ///
    /// Advancing the slot is a compare-and-set, and each run uses a slot-derived
    /// job id, so concurrent workers never schedule the same slot twice.
    pub(crate) async fn promote_repeatables(&self) -> QueueResult<usize> {
        let now = now_ms();
        let mut conn = self.redis.clone();
        let raw: HashMap<String, String> = conn.hgetall(self.keys.repeat()).await?;

        let mut scheduled = 0;
        for (field, json) in raw {
            let Ok(definition) = serde_json::from_str::<RepeatableJob>(&json) else {
                continue;
            };
            if definition.next_run_ms > now {
                continue;
            }

            let slot = definition.next_run_ms;
            let advanced = RepeatableJob {
                next_run_ms: RepeatableJob::next_slot(now, definition.every_ms),
                ..definition.clone()
            };

            let won: i64 = scripts::ADVANCE_REPEAT
                .key(self.keys.repeat())
                .arg(&field)
                .arg(&json)
                .arg(serde_json::to_string(&advanced)?)
                .invoke_async(&mut conn)
                .await?;
            if won == 0 {
                continue;
            }

            let opts = JobOptions {
                job_id: Some(definition.slot_job_id(slot)),
                delay_ms: 0,
                ..definition.opts.clone()
            };
            self.add_raw(
                &definition.name,
                definition.data.clone(),
                opts,
                Some(definition.key.clone()),
            )
            .await?;
            scheduled += 1;
        }

        Ok(scheduled)
    }
}
