//! Runner error types.

use marketplace::RepositoryError;
use saga::SagaError;
use thiserror::Error;

/// Errors that stop the runner.
///
/// A malformed input line is not one of them: it is reported on the output
/// stream and the runner moves on to the next line.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to seed marketplace: {0}")]
    Seed(#[from] RepositoryError),

    #[error("Saga error: {0}")]
    Saga(#[from] SagaError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
