//! Shared types for the purchase saga coordinator.

mod ids;
mod money;
mod version;

pub use ids::{IncidentId, OrderId, ProductId, SagaId, TransactionId, UserId};
pub use money::Money;
pub use version::Version;
