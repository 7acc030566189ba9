use async_trait::async_trait;

use crate::{
    Availability, Order, OrderId, OrderPatch, Product, ProductId, ProductPatch, Result, User,
    UserId, Version,
};

/// Typed accessor over the marketplace record store.
///
/// Pure request/response mapping with no business rules. Missing records are
/// reported as the matching `*NotFound` error rather than `Option::None` so
/// callers can propagate them with `?`.
#[async_trait]
pub trait MarketplaceRepository: Send + Sync {
    /// Fetches a product.
    async fn get_product(&self, id: &ProductId) -> Result<Product>;

    /// Applies `patch` only if the product is still at `expected_version`.
    ///
    /// Returns the updated product (with its new version) or
    /// `VersionConflict` if another writer got there first.
    async fn cas_update_product(
        &self,
        id: &ProductId,
        expected_version: Version,
        patch: ProductPatch,
    ) -> Result<Product>;

    /// Lists every product.
    async fn list_products(&self) -> Result<Vec<Product>>;

    /// Fetches a user.
    async fn get_user(&self, id: &UserId) -> Result<User>;

    /// Persists a new order.
    async fn create_order(&self, order: Order) -> Result<Order>;

    /// Fetches an order.
    async fn get_order(&self, id: &OrderId) -> Result<Order>;

    /// Applies a partial update to an order.
    async fn update_order(&self, id: &OrderId, patch: OrderPatch) -> Result<Order>;
}

/// Read-only conveniences built on the repository.
#[async_trait]
pub trait MarketplaceRepositoryExt: MarketplaceRepository {
    /// Reports whether a product can currently be bought.
    async fn check_availability(&self, id: &ProductId) -> Result<Availability> {
        let product = self.get_product(id).await?;
        Ok(Availability::from(&product))
    }
}

impl<T: MarketplaceRepository + ?Sized> MarketplaceRepositoryExt for T {}
