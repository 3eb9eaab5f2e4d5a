use herald_common::error::AppError;
use herald_queue::QueueError;
use thiserror::Error;

/// Errors raised inside the notification and email pipelines.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Real-time transport error: {0}")]
    Realtime(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Email delivery error: {0}")]
    Email(String),
}

pub type NotifierResult<T> = Result<T, NotifierError>;

impl From<NotifierError> for AppError {
    fn from(err: NotifierError) -> Self {
        match err {
            NotifierError::Redis(e) => AppError::Redis(e),
            NotifierError::Database(e) => AppError::Database(e),
            NotifierError::Serialization(e) => AppError::Serialization(e),
            other => AppError::Queue(other.to_string()),
        }
    }
}
