use thiserror::Error;

/// Errors raised by queue and worker operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid repeat interval: {0}")]
    InvalidRepeat(String),

    #[error("Invalid rate limit: {0}")]
    InvalidRateLimit(String),
}

impl QueueError {
    /// Whether the error came from a dropped or refused Redis connection.
    pub fn is_connection_error(&self) -> bool {
        match self {
            QueueError::Redis(e) => e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal(),
            _ => false,
        }
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
