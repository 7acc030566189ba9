use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    MarketplaceRepository, Order, OrderId, OrderPatch, Product, ProductId, ProductPatch, Result,
    RepositoryError, User, UserId, Version,
};

/// Seed document for [`InMemoryMarketplace::from_json`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketplaceSeed {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub orders: Vec<Order>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Every call fails while set.
    unavailable: AtomicBool,
    /// The next N calls fail, then the store recovers.
    unavailable_calls: AtomicU32,
    /// The next N compare-and-swap calls report a conflict.
    cas_conflicts: AtomicU32,
    /// `update_order` fails while set.
    fail_order_updates: AtomicBool,
    /// `create_order` fails while set.
    fail_order_creates: AtomicBool,
}

/// In-memory marketplace record store.
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// assertions and fault injection while the saga steps use another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMarketplace {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
    users: Arc<RwLock<HashMap<UserId, User>>>,
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    faults: Arc<Faults>,
}

impl InMemoryMarketplace {
    /// Creates an empty marketplace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a marketplace from a `{ products, users, orders }` JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let seed: MarketplaceSeed = serde_json::from_str(json)?;
        Ok(Self::from_seed(seed))
    }

    /// Creates a marketplace from an already parsed seed.
    pub fn from_seed(seed: MarketplaceSeed) -> Self {
        let products = keyed(seed.products, |p| p.id.clone());
        let users = keyed(seed.users, |u| u.id.clone());
        let orders = keyed(seed.orders, |o| o.id.clone());

        Self {
            products: Arc::new(RwLock::new(products)),
            users: Arc::new(RwLock::new(users)),
            orders: Arc::new(RwLock::new(orders)),
            faults: Arc::default(),
        }
    }

    /// Inserts or replaces a product.
    pub async fn insert_product(&self, product: Product) {
        self.products
            .write()
            .await
            .insert(product.id.clone(), product);
    }

    /// Inserts or replaces a user.
    pub async fn insert_user(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    /// Returns the stock level of a product, if it exists.
    pub async fn in_stock(&self, id: &ProductId) -> Option<u32> {
        self.products.read().await.get(id).map(|p| p.in_stock)
    }

    /// Returns a snapshot of all orders.
    pub async fn orders(&self) -> Vec<Order> {
        self.orders.read().await.values().cloned().collect()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Makes every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `calls` calls fail with `Unavailable`.
    pub fn fail_next_calls(&self, calls: u32) {
        self.faults.unavailable_calls.store(calls, Ordering::SeqCst);
    }

    /// Makes the next `conflicts` compare-and-swap calls lose the race.
    pub fn inject_cas_conflicts(&self, conflicts: u32) {
        self.faults.cas_conflicts.store(conflicts, Ordering::SeqCst);
    }

    /// Makes `update_order` fail with `Unavailable`.
    pub fn set_fail_order_updates(&self, fail: bool) {
        self.faults.fail_order_updates.store(fail, Ordering::SeqCst);
    }

    /// Makes `create_order` fail with `Unavailable`.
    pub fn set_fail_order_creates(&self, fail: bool) {
        self.faults.fail_order_creates.store(fail, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "marketplace store is down".to_string(),
            ));
        }
        if take_one(&self.faults.unavailable_calls) {
            return Err(RepositoryError::Unavailable(
                "marketplace store timed out".to_string(),
            ));
        }
        Ok(())
    }
}

fn keyed<K, V>(items: Vec<V>, key: impl Fn(&V) -> K) -> HashMap<K, V>
where
    K: std::hash::Hash + Eq,
{
    items.into_iter().map(|item| (key(&item), item)).collect()
}

/// Decrements `counter` if it is positive; returns whether it did.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl MarketplaceRepository for InMemoryMarketplace {
    async fn get_product(&self, id: &ProductId) -> Result<Product> {
        self.check_available()?;
        self.products
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::ProductNotFound(id.clone()))
    }

    async fn cas_update_product(
        &self,
        id: &ProductId,
        expected_version: Version,
        patch: ProductPatch,
    ) -> Result<Product> {
        self.check_available()?;
        let mut products = self.products.write().await;
        let product = products
            .get_mut(id)
            .ok_or_else(|| RepositoryError::ProductNotFound(id.clone()))?;

        if take_one(&self.faults.cas_conflicts) || product.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                product_id: id.clone(),
                expected: expected_version,
                actual: product.version,
            });
        }

        patch.apply(product);
        product.version = product.version.next();
        tracing::debug!(
            product_id = %id,
            in_stock = product.in_stock,
            version = %product.version,
            "product updated"
        );
        Ok(product.clone())
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        self.check_available()?;
        let mut products: Vec<_> = self.products.read().await.values().cloned().collect();
        products.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(products)
    }

    async fn get_user(&self, id: &UserId) -> Result<User> {
        self.check_available()?;
        self.users
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::UserNotFound(id.clone()))
    }

    async fn create_order(&self, order: Order) -> Result<Order> {
        self.check_available()?;
        if self.faults.fail_order_creates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "order table is read-only".to_string(),
            ));
        }
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(RepositoryError::DuplicateOrder(order.id));
        }
        orders.insert(order.id.clone(), order.clone());
        tracing::debug!(order_id = %order.id, status = %order.status, "order created");
        Ok(order)
    }

    async fn get_order(&self, id: &OrderId) -> Result<Order> {
        self.check_available()?;
        self.orders
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::OrderNotFound(id.clone()))
    }

    async fn update_order(&self, id: &OrderId, patch: OrderPatch) -> Result<Order> {
        self.check_available()?;
        if self.faults.fail_order_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "order table is read-only".to_string(),
            ));
        }
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(id)
            .ok_or_else(|| RepositoryError::OrderNotFound(id.clone()))?;
        patch.apply(order);
        Ok(order.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AvailabilityStatus, MarketplaceRepositoryExt, Money, OrderStatus};
    use chrono::{NaiveDate, Utc};
    use common::TransactionId;

    async fn marketplace_with_laptop(stock: u32) -> InMemoryMarketplace {
        let marketplace = InMemoryMarketplace::new();
        marketplace
            .insert_product(Product::new("p1", "Laptop", Money::from_cents(99_900), stock))
            .await;
        marketplace
    }

    fn order(id: &str) -> Order {
        Order {
            id: OrderId::new(id),
            user_id: UserId::new("u1"),
            product_id: ProductId::new("p1"),
            product_name: "Laptop".to_string(),
            quantity: 1,
            price: Money::from_cents(99_900),
            transaction_id: TransactionId::new("trans-1"),
            status: OrderStatus::Confirmed,
            created_at: Utc::now(),
            delivery_date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn cas_update_bumps_version() {
        let marketplace = marketplace_with_laptop(5).await;
        let id = ProductId::new("p1");

        let product = marketplace.get_product(&id).await.unwrap();
        let updated = marketplace
            .cas_update_product(&id, product.version, ProductPatch::stock(4))
            .await
            .unwrap();

        assert_eq!(updated.in_stock, 4);
        assert_eq!(updated.version, product.version.next());
    }

    #[tokio::test]
    async fn cas_update_with_stale_version_conflicts() {
        let marketplace = marketplace_with_laptop(5).await;
        let id = ProductId::new("p1");
        let stale = marketplace.get_product(&id).await.unwrap().version;

        marketplace
            .cas_update_product(&id, stale, ProductPatch::stock(4))
            .await
            .unwrap();

        let result = marketplace
            .cas_update_product(&id, stale, ProductPatch::stock(3))
            .await;
        assert!(matches!(result, Err(RepositoryError::VersionConflict { .. })));
        assert_eq!(marketplace.in_stock(&id).await, Some(4));
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let marketplace = marketplace_with_laptop(5).await;
        let id = ProductId::new("p1");
        marketplace.inject_cas_conflicts(1);

        let version = marketplace.get_product(&id).await.unwrap().version;
        let first = marketplace
            .cas_update_product(&id, version, ProductPatch::stock(4))
            .await;
        assert!(matches!(first, Err(RepositoryError::VersionConflict { .. })));

        let second = marketplace
            .cas_update_product(&id, version, ProductPatch::stock(4))
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let marketplace = InMemoryMarketplace::new();
        assert!(matches!(
            marketplace.get_product(&ProductId::new("nope")).await,
            Err(RepositoryError::ProductNotFound(_))
        ));
        assert!(matches!(
            marketplace.get_user(&UserId::new("nope")).await,
            Err(RepositoryError::UserNotFound(_))
        ));
        assert!(matches!(
            marketplace
                .update_order(&OrderId::new("nope"), OrderPatch::default())
                .await,
            Err(RepositoryError::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn fail_next_calls_recovers() {
        let marketplace = marketplace_with_laptop(1).await;
        let id = ProductId::new("p1");
        marketplace.fail_next_calls(2);

        assert!(marketplace.get_product(&id).await.is_err());
        let err = marketplace.get_product(&id).await.unwrap_err();
        assert!(err.is_transient());
        assert!(marketplace.get_product(&id).await.is_ok());
    }

    #[tokio::test]
    async fn order_create_and_update() {
        let marketplace = InMemoryMarketplace::new();
        let created = marketplace.create_order(order("order-1")).await.unwrap();

        let duplicate = marketplace.create_order(order("order-1")).await;
        assert!(matches!(duplicate, Err(RepositoryError::DuplicateOrder(_))));

        let cancelled = marketplace
            .update_order(&created.id, OrderPatch::status(OrderStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(marketplace.order_count().await, 1);
    }

    #[tokio::test]
    async fn order_update_fault() {
        let marketplace = InMemoryMarketplace::new();
        let created = marketplace.create_order(order("order-1")).await.unwrap();
        marketplace.set_fail_order_updates(true);

        let result = marketplace
            .update_order(&created.id, OrderPatch::status(OrderStatus::Cancelled))
            .await;
        assert!(matches!(result, Err(RepositoryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn seeds_from_json() {
        let json = r#"{
            "products": [
                {"id": "p1", "name": "Laptop", "price": 99900, "inStock": 2},
                {"id": "p2", "name": "Charger", "price": 2500, "inStock": 0}
            ],
            "users": [{"id": "u1", "address": "12 High St"}]
        }"#;
        let marketplace = InMemoryMarketplace::from_json(json).unwrap();

        let products = marketplace.list_products().await.unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].id, ProductId::new("p1"));

        let user = marketplace.get_user(&UserId::new("u1")).await.unwrap();
        assert_eq!(user.address, "12 High St");

        let availability = marketplace
            .check_availability(&ProductId::new("p2"))
            .await
            .unwrap();
        assert_eq!(availability.status, AvailabilityStatus::ProductOutOfStock);
    }

    #[tokio::test]
    async fn invalid_seed_is_rejected() {
        let result = InMemoryMarketplace::from_json("{ not json");
        assert!(matches!(result, Err(RepositoryError::Seed(_))));
    }
}
