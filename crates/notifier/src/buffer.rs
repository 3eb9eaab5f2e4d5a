//! Write-behind buffer: a Redis list of serialized notification records.
//!
//! The notification worker appends with `RPUSH`; the flush worker drains the
//! head with a pipelined run of `LPOP`s. An item leaves the list at pop time,
//! whatever happens to it afterwards.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::NotifierResult;

/// Redis key of the buffer list.
pub const BUFFER_KEY: &str = "buffer:notifications";

/// Result of one pop inside a batch: `Ok(None)` for an empty list, `Err` for a
/// per-command failure reported by the server.
pub type PoppedItem = Result<Option<String>, String>;

/// Append/drain access to the write-behind buffer.
#[async_trait]
pub trait NotificationBuffer: Send + Sync {
    /// Append one serialized record to the tail.
    async fn push(&self, value: &str) -> NotifierResult<()>;

    /// Pop up to `max` items from the head in a single round trip.
    async fn pop_batch(&self, max: usize) -> NotifierResult<Vec<PoppedItem>>;

    /// Current number of buffered items.
    async fn len(&self) -> NotifierResult<u64>;
}

/// Redis-backed buffer sharing the service's connection manager.
#[derive(Clone)]
pub struct RedisBuffer {
    redis: ConnectionManager,
    key: String,
}

impl RedisBuffer {
    pub fn new(redis: ConnectionManager) -> Self {
        Self::with_key(redis, BUFFER_KEY)
    }

    pub fn with_key(redis: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            redis,
            key: key.into(),
        }
    }
}

#[async_trait]
impl NotificationBuffer for RedisBuffer {
    async fn push(&self, value: &str) -> NotifierResult<()> {
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(&self.key, value).await?;
        Ok(())
    }

    async fn pop_batch(&self, max: usize) -> NotifierResult<Vec<PoppedItem>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for _ in 0..max {
            pipe.cmd("LPOP").arg(&self.key);
        }

        let mut conn = self.redis.clone();
        let replies: Vec<redis::Value> = pipe.query_async(&mut conn).await?;
        Ok(replies.into_iter().map(decode_pop).collect())
    }

    async fn len(&self) -> NotifierResult<u64> {
        let mut conn = self.redis.clone();
        Ok(conn.llen(&self.key).await?)
    }
}

fn decode_pop(reply: redis::Value) -> PoppedItem {
    match reply {
        redis::Value::Nil => Ok(None),
        redis::Value::BulkString(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| format!("non UTF-8 buffer entry: {}", e)),
        redis::Value::SimpleString(s) => Ok(Some(s)),
        other => Err(format!("unexpected LPOP reply: {:?}", other)),
    }
}
