use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not configured")]
    NotConfigured,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[cfg(feature = "database-sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type QueueResult<T> = Result<T, QueueError>;
