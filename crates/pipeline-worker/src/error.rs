//! Error types for the pipeline worker
//!
//! The queue runtime keys its redelivery decision off `is_retryable`:
//! transient failures go back on the queue with backoff, permanent ones
//! are recorded on the task and acknowledged. Drops (intent gate negative,
//! missing email at delivery) never surface here — handlers log them and
//! return `Ok(())`.

use thiserror::Error;

/// Worker error types
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Redis connection or operation error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Database operation error
    #[error("Database error: {0}")]
    Database(String),

    /// Connector call failure
    #[error("Connector error: {0}")]
    Connector(String),

    /// Generation provider failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// LLM call failure
    #[error("LLM error: {0}")]
    Llm(String),

    /// Mail transport failure
    #[error("Mail error: {0}")]
    Mail(String),

    /// Object store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid task state or configuration; never retried
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl WorkerError {
    /// Check if this error is retryable
    ///
    /// Transient failures (network, Redis, DB) are retryable; malformed
    /// payloads and invalid state are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::Redis(_)
                | WorkerError::Database(_)
                | WorkerError::Connector(_)
                | WorkerError::Provider(_)
                | WorkerError::Mail(_)
                | WorkerError::Storage(_)
        )
    }

    pub fn connector(details: impl Into<String>) -> Self {
        WorkerError::Connector(details.into())
    }

    pub fn provider(details: impl Into<String>) -> Self {
        WorkerError::Provider(details.into())
    }

    pub fn llm(details: impl Into<String>) -> Self {
        WorkerError::Llm(details.into())
    }

    pub fn mail(details: impl Into<String>) -> Self {
        WorkerError::Mail(details.into())
    }

    pub fn storage(details: impl Into<String>) -> Self {
        WorkerError::Storage(details.into())
    }

    pub fn invalid_state(details: impl Into<String>) -> Self {
        WorkerError::InvalidState(details.into())
    }
}

impl From<shared::Error> for WorkerError {
    fn from(e: shared::Error) -> Self {
        match e {
            // Missing rows and constraint conflicts will not heal on redelivery
            shared::Error::NotFound { .. }
            | shared::Error::Conflict(_)
            | shared::Error::Validation(_)
            | shared::Error::Config(_) => WorkerError::InvalidState(e.to_string()),
            other => WorkerError::Database(other.to_string()),
        }
    }
}

/// Convenience result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;
