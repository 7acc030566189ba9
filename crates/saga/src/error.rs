//! Saga error types.

use std::time::Duration;

use common::{ProductId, SagaId, TransactionId, UserId};
use marketplace::RepositoryError;
use step_store::{SagaState, StepState, StepStoreError};
use thiserror::Error;

use crate::services::PaymentError;

/// How the coordinator treats a failed forward action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input refers to something that does not exist; no effect occurred.
    Validation,
    /// The same action may succeed if retried.
    Transient,
    /// A legitimate refusal (out of stock, declined card).
    BusinessRule,
}

/// Errors raised by step forward and compensating actions.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Out of stock for product {product_id}: requested {requested}, available {available}")]
    OutOfStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(u32),

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Payment gateway unavailable: {0}")]
    PaymentGatewayUnavailable(String),

    #[error("Refund failed for {transaction_id}: {reason}")]
    RefundFailed {
        transaction_id: TransactionId,
        reason: String,
    },

    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// A compare-and-swap lost the race on every allowed attempt.
    #[error("Inventory contention on product {product_id} after {attempts} attempts")]
    InventoryContention { product_id: ProductId, attempts: u32 },

    #[error("Step '{step}' exceeded its deadline of {timeout:?}")]
    Timeout { step: String, timeout: Duration },

    /// The store refused a write for a reason retrying will not fix.
    #[error("Repository rejected the request: {0}")]
    Rejected(String),

    /// A result this step depends on is missing or malformed.
    #[error("Missing or invalid result from step '{step}': {reason}")]
    InvalidResult { step: String, reason: String },
}

impl StepError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::ProductNotFound(_)
            | StepError::UserNotFound(_)
            | StepError::InvalidQuantity(_)
            | StepError::InvalidResult { .. } => ErrorKind::Validation,
            StepError::PaymentGatewayUnavailable(_)
            | StepError::RepositoryUnavailable(_)
            | StepError::InventoryContention { .. }
            | StepError::Timeout { .. } => ErrorKind::Transient,
            StepError::OutOfStock { .. }
            | StepError::PaymentDeclined(_)
            | StepError::RefundFailed { .. }
            | StepError::Rejected(_) => ErrorKind::BusinessRule,
        }
    }

    /// Returns true if the error is transient.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Returns true if the coordinator should re-invoke the forward action.
    ///
    /// Contention has already been retried inside the step and a timed out
    /// action may have committed, so neither is retried again.
    pub fn is_retryable(&self) -> bool {
        self.is_transient()
            && !matches!(
                self,
                StepError::InventoryContention { .. } | StepError::Timeout { .. }
            )
    }

    /// A reason that is safe to show to the user.
    pub fn user_message(&self) -> String {
        match self {
            StepError::ProductNotFound(_) => "product not found".to_string(),
            StepError::UserNotFound(_) => "unknown user".to_string(),
            StepError::OutOfStock { .. } => "out of stock".to_string(),
            StepError::InvalidQuantity(_) => "invalid quantity".to_string(),
            StepError::PaymentDeclined(_) => "payment declined".to_string(),
            StepError::RefundFailed { .. } => "refund failed".to_string(),
            StepError::PaymentGatewayUnavailable(_) => {
                "payment service temporarily unavailable".to_string()
            }
            StepError::RepositoryUnavailable(_)
            | StepError::InventoryContention { .. }
            | StepError::Timeout { .. } => "service temporarily unavailable".to_string(),
            StepError::Rejected(_) | StepError::InvalidResult { .. } => {
                "order could not be processed".to_string()
            }
        }
    }
}

impl From<RepositoryError> for StepError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::ProductNotFound(id) => StepError::ProductNotFound(id),
            RepositoryError::UserNotFound(id) => StepError::UserNotFound(id),
            RepositoryError::VersionConflict { product_id, .. } => {
                StepError::InventoryContention {
                    product_id,
                    attempts: 1,
                }
            }
            RepositoryError::Unavailable(reason) => StepError::RepositoryUnavailable(reason),
            other @ (RepositoryError::OrderNotFound(_)
            | RepositoryError::DuplicateOrder(_)
            | RepositoryError::Seed(_)) => StepError::Rejected(other.to_string()),
        }
    }
}

impl From<PaymentError> for StepError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Declined(reason) => StepError::PaymentDeclined(reason),
            PaymentError::Unavailable(reason) => StepError::PaymentGatewayUnavailable(reason),
            PaymentError::UnknownTransaction(transaction_id) => StepError::RefundFailed {
                transaction_id,
                reason: "unknown transaction".to_string(),
            },
            PaymentError::RefundRejected {
                transaction_id,
                reason,
            } => StepError::RefundFailed {
                transaction_id,
                reason,
            },
        }
    }
}

/// Errors that stop the coordinator itself.
///
/// Step failures never surface here; they become a [`crate::SagaOutcome`].
#[derive(Debug, Error)]
pub enum SagaError {
    /// The idempotency store failed.
    #[error("Idempotency store error: {0}")]
    Store(#[from] StepStoreError),

    /// Another run of the same saga is in progress in this process.
    #[error("Saga {0} is already running")]
    AlreadyRunning(SagaId),

    /// A step has no compensation registered.
    #[error("No compensation registered for step '{0}'")]
    MissingCompensation(String),

    /// Two steps share a name and would share an idempotency key.
    #[error("Duplicate step name '{0}'")]
    DuplicateStep(String),

    /// The name is empty or contains the `/` that separates a key's saga
    /// ID from its step name.
    #[error("Invalid step name '{0}'")]
    InvalidStepName(String),

    /// The saga has no steps.
    #[error("Saga has no steps")]
    NoSteps,

    /// No saga with this ID has been recorded.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// Saga is in an invalid state for the requested operation.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidState { expected: String, actual: SagaState },

    /// The step never succeeded, so there is nothing to compensate.
    #[error("Step '{step}' cannot be compensated from state {state}")]
    NotCompensable { step: String, state: StepState },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
