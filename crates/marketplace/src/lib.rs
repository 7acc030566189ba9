//! Marketplace records and the repository client.
//!
//! The record store itself is an external collaborator. This crate only
//! defines the typed interface the saga steps talk to ([`MarketplaceRepository`])
//! plus an in-memory implementation for tests and local runs.

pub mod error;
pub mod memory;
pub mod order;
pub mod product;
pub mod repository;
pub mod user;

pub use common::{Money, OrderId, ProductId, UserId, Version};
pub use error::{RepositoryError, Result};
pub use memory::{InMemoryMarketplace, MarketplaceSeed};
pub use order::{Order, OrderPatch, OrderStatus};
pub use product::{Availability, AvailabilityStatus, Product, ProductPatch};
pub use repository::{MarketplaceRepository, MarketplaceRepositoryExt};
pub use user::User;
