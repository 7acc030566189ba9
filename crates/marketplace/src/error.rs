use thiserror::Error;

use crate::{OrderId, ProductId, UserId, Version};

/// Errors returned by the marketplace repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No product with this ID exists.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// No user with this ID exists.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// No order with this ID exists.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// A compare-and-swap update lost the race.
    #[error("Version conflict for product {product_id}: expected {expected}, found {actual}")]
    VersionConflict {
        product_id: ProductId,
        expected: Version,
        actual: Version,
    },

    /// An order with this ID already exists.
    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// The store could not be reached.
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    /// Seed data could not be parsed.
    #[error("Invalid seed data: {0}")]
    Seed(#[from] serde_json::Error),
}

impl RepositoryError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepositoryError::Unavailable(_) | RepositoryError::VersionConflict { .. }
        )
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;
