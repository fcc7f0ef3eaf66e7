//! Infrastructure error types for the collector.
//!
//! Uses thiserror for ergonomic error handling with automatic Display implementations.

/// Application-level errors raised by the store, the queue and the lock.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Resource not found
    #[error("{0} not found")]
    NotFound(String),

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Write rejected because the row is not in the expected state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Redis command failed
    #[error("Redis error: {0}")]
    Redis(String),

    /// Task envelope could not be encoded or decoded
    #[error("Queue error: {0}")]
    Queue(String),

    /// Distributed lock operation failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Token encryption or decryption failed
    #[error("Crypto error: {0}")]
    Crypto(String),
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

// Conversion implementations for common error types

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("Invalid UUID: {}", err))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Redis(err.to_string())
    }
}
