use thiserror::Error;

use crate::{SagaId, Version};

/// Errors that can occur when interacting with the idempotency store.
#[derive(Debug, Error)]
pub enum StepStoreError {
    /// Another writer appended to the saga's journal first.
    #[error(
        "Concurrency conflict for saga {saga_id}: expected {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// A record does not describe the saga/step it claims to.
    #[error("Invalid step record: {0}")]
    InvalidRecord(String),

    /// The backing store cannot be reached.
    #[error("Idempotency store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for idempotency store operations.
pub type Result<T> = std::result::Result<T, StepStoreError>;
