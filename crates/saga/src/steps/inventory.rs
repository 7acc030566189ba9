//! Inventory reservation with compare-and-swap stock updates.

use async_trait::async_trait;
use common::{Money, ProductId};
use marketplace::{MarketplaceRepository, Product, ProductPatch, RepositoryError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use step_store::IdempotencyKey;

use crate::error::StepError;
use crate::purchase::{PurchaseInput, STEP_RESERVE_INVENTORY};
use crate::step::{Compensation, SagaContext, Step, decode_result, encode_result};

/// Result of a successful reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Money,
    pub quantity: u32,
    /// Stock level observed just before the decrement.
    pub previous_stock: u32,
}

impl Reservation {
    /// Price of the reserved quantity.
    pub fn total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Decrements stock by `quantity` under optimistic concurrency.
///
/// Reads the product, then writes the new level conditioned on the version it
/// read. A lost race re-reads and tries again, up to `max_attempts` times.
/// The write records `key` as holding the stock, so repeating a reservation
/// that already landed takes nothing more.
pub async fn reserve_stock<R>(
    repo: &R,
    product_id: &ProductId,
    quantity: u32,
    key: &IdempotencyKey,
    max_attempts: u32,
) -> Result<Reservation, StepError>
where
    R: MarketplaceRepository + ?Sized,
{
    if quantity == 0 {
        return Err(StepError::InvalidQuantity(quantity));
    }
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let product = repo.get_product(product_id).await?;
        if product.holds_reservation(key.as_str()) {
            tracing::info!(%product_id, %key, "reservation already holds stock");
            return Ok(Reservation {
                product_id: product_id.clone(),
                product_name: product.name,
                unit_price: product.price,
                quantity,
                previous_stock: product.in_stock.saturating_add(quantity),
            });
        }
        if !product.has_stock(quantity) {
            return Err(StepError::OutOfStock {
                product_id: product_id.clone(),
                requested: quantity,
                available: product.in_stock,
            });
        }

        let patch = ProductPatch::reserve(product.in_stock - quantity, key.as_str());
        match repo
            .cas_update_product(product_id, product.version, patch)
            .await
        {
            Ok(updated) => {
                tracing::info!(
                    %product_id,
                    quantity,
                    remaining = updated.in_stock,
                    "stock reserved"
                );
                return Ok(Reservation {
                    product_id: product_id.clone(),
                    product_name: product.name,
                    unit_price: product.price,
                    quantity,
                    previous_stock: product.in_stock,
                });
            }
            Err(RepositoryError::VersionConflict { .. }) => {
                metrics::counter!("inventory_cas_conflicts_total").increment(1);
                tracing::debug!(%product_id, attempt, "stock changed concurrently, re-reading");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(StepError::InventoryContention {
        product_id: product_id.clone(),
        attempts: max_attempts,
    })
}

/// Returns the `quantity` units held by reservation `key` to stock.
///
/// A reservation that holds nothing, because it never landed or was already
/// released, leaves the product untouched. Used by the reservation
/// compensation and by operators reconciling stock after a fatal
/// inconsistency.
pub async fn release_stock<R>(
    repo: &R,
    product_id: &ProductId,
    quantity: u32,
    key: &IdempotencyKey,
    max_attempts: u32,
) -> Result<Product, StepError>
where
    R: MarketplaceRepository + ?Sized,
{
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let product = repo.get_product(product_id).await?;
        if !product.holds_reservation(key.as_str()) {
            tracing::info!(%product_id, %key, "reservation holds no stock, nothing to release");
            return Ok(product);
        }

        let patch =
            ProductPatch::release(product.in_stock.saturating_add(quantity), key.as_str());
        match repo
            .cas_update_product(product_id, product.version, patch)
            .await
        {
            Ok(updated) => {
                tracing::info!(
                    %product_id,
                    quantity,
                    in_stock = updated.in_stock,
                    "stock released"
                );
                return Ok(updated);
            }
            Err(RepositoryError::VersionConflict { .. }) => {
                metrics::counter!("inventory_cas_conflicts_total").increment(1);
                tracing::debug!(%product_id, attempt, "stock changed concurrently, re-reading");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(StepError::InventoryContention {
        product_id: product_id.clone(),
        attempts: max_attempts,
    })
}

/// The key a saga's reservation holds stock under.
fn reservation_key(ctx: &SagaContext<PurchaseInput>) -> IdempotencyKey {
    IdempotencyKey::new(ctx.saga_id(), STEP_RESERVE_INVENTORY)
}

/// Reserves the requested quantity of the product.
#[derive(Debug, Clone)]
pub struct ReserveInventory<R> {
    repo: R,
    cas_retries: u32,
}

impl<R> ReserveInventory<R> {
    pub fn new(repo: R, cas_retries: u32) -> Self {
        Self {
            repo,
            cas_retries: cas_retries.max(1),
        }
    }
}

#[async_trait]
impl<R: MarketplaceRepository> Step<PurchaseInput> for ReserveInventory<R> {
    fn name(&self) -> &str {
        STEP_RESERVE_INVENTORY
    }

    async fn forward(&self, ctx: &SagaContext<PurchaseInput>) -> Result<Value, StepError> {
        let input = ctx.input();
        let reservation = reserve_stock(
            &self.repo,
            &input.product_id,
            input.quantity,
            &reservation_key(ctx),
            self.cas_retries,
        )
        .await?;
        encode_result(STEP_RESERVE_INVENTORY, &reservation)
    }
}

/// Puts reserved stock back.
#[derive(Debug, Clone)]
pub struct ReleaseInventory<R> {
    repo: R,
    cas_retries: u32,
}

impl<R> ReleaseInventory<R> {
    pub fn new(repo: R, cas_retries: u32) -> Self {
        Self {
            repo,
            cas_retries: cas_retries.max(1),
        }
    }
}

#[async_trait]
impl<R: MarketplaceRepository> Compensation<PurchaseInput> for ReleaseInventory<R> {
    async fn compensate(
        &self,
        ctx: &SagaContext<PurchaseInput>,
        result: &Value,
    ) -> Result<(), StepError> {
        let reservation: Reservation = decode_result(STEP_RESERVE_INVENTORY, result)?;
        release_stock(
            &self.repo,
            &reservation.product_id,
            reservation.quantity,
            &reservation_key(ctx),
            self.cas_retries,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{SagaId, UserId};
    use marketplace::InMemoryMarketplace;

    async fn marketplace(stock: u32) -> InMemoryMarketplace {
        let marketplace = InMemoryMarketplace::new();
        marketplace
            .insert_product(Product::new("p1", "Laptop", Money::from_cents(99_900), stock))
            .await;
        marketplace
    }

    fn key() -> IdempotencyKey {
        IdempotencyKey::new(&SagaId::new("s-1"), STEP_RESERVE_INVENTORY)
    }

    #[tokio::test]
    async fn reserve_decrements_and_reports_previous_level() {
        let repo = marketplace(5).await;
        let reservation = reserve_stock(&repo, &ProductId::new("p1"), 2, &key(), 3)
            .await
            .unwrap();

        assert_eq!(reservation.previous_stock, 5);
        assert_eq!(reservation.product_name, "Laptop");
        assert_eq!(reservation.total(), Money::from_cents(199_800));
        assert_eq!(repo.in_stock(&ProductId::new("p1")).await, Some(3));
    }

    #[tokio::test]
    async fn reserve_rejects_insufficient_stock() {
        let repo = marketplace(1).await;
        let result = reserve_stock(&repo, &ProductId::new("p1"), 2, &key(), 3).await;

        assert!(matches!(
            result,
            Err(StepError::OutOfStock {
                requested: 2,
                available: 1,
                ..
            })
        ));
        assert_eq!(repo.in_stock(&ProductId::new("p1")).await, Some(1));
    }

    #[tokio::test]
    async fn reserve_rereads_after_conflict() {
        let repo = marketplace(5).await;
        repo.inject_cas_conflicts(2);

        let reservation = reserve_stock(&repo, &ProductId::new("p1"), 1, &key(), 3)
            .await
            .unwrap();
        assert_eq!(reservation.previous_stock, 5);
        assert_eq!(repo.in_stock(&ProductId::new("p1")).await, Some(4));
    }

    #[tokio::test]
    async fn reserve_gives_up_after_bounded_conflicts() {
        let repo = marketplace(5).await;
        repo.inject_cas_conflicts(3);

        let result = reserve_stock(&repo, &ProductId::new("p1"), 1, &key(), 3).await;
        assert!(matches!(
            result,
            Err(StepError::InventoryContention { attempts: 3, .. })
        ));
        assert_eq!(repo.in_stock(&ProductId::new("p1")).await, Some(5));
    }

    #[tokio::test]
    async fn reserve_unknown_product() {
        let repo = InMemoryMarketplace::new();
        let result = reserve_stock(&repo, &ProductId::new("nope"), 1, &key(), 3).await;
        assert!(matches!(result, Err(StepError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn reserve_with_zero_attempts_still_tries_once() {
        let repo = marketplace(5).await;
        let reservation = reserve_stock(&repo, &ProductId::new("p1"), 1, &key(), 0)
            .await
            .unwrap();
        assert_eq!(reservation.previous_stock, 5);
        assert_eq!(repo.in_stock(&ProductId::new("p1")).await, Some(4));

        let product = release_stock(&repo, &ProductId::new("p1"), 1, &key(), 0)
            .await
            .unwrap();
        assert_eq!(product.in_stock, 5);
    }

    #[tokio::test]
    async fn repeated_reserve_takes_stock_once() {
        let repo = marketplace(5).await;
        reserve_stock(&repo, &ProductId::new("p1"), 2, &key(), 3)
            .await
            .unwrap();
        let again = reserve_stock(&repo, &ProductId::new("p1"), 2, &key(), 3)
            .await
            .unwrap();

        assert_eq!(again.previous_stock, 5);
        assert_eq!(repo.in_stock(&ProductId::new("p1")).await, Some(3));
    }

    #[tokio::test]
    async fn release_restores_stock() {
        let repo = marketplace(5).await;
        reserve_stock(&repo, &ProductId::new("p1"), 2, &key(), 3)
            .await
            .unwrap();
        let product = release_stock(&repo, &ProductId::new("p1"), 2, &key(), 3)
            .await
            .unwrap();
        assert_eq!(product.in_stock, 5);
        assert!(!product.holds_reservation(key().as_str()));
    }

    #[tokio::test]
    async fn release_without_reservation_leaves_stock() {
        let repo = marketplace(3).await;
        let product = release_stock(&repo, &ProductId::new("p1"), 2, &key(), 3)
            .await
            .unwrap();
        assert_eq!(product.in_stock, 3);
    }

    #[tokio::test]
    async fn compensating_twice_releases_once() {
        let repo = marketplace(5).await;
        let input = PurchaseInput {
            user_id: UserId::new("u1"),
            product_id: ProductId::new("p1"),
            quantity: 1,
            shipping_address: "1 Main St".to_string(),
        };
        let ctx = SagaContext::new(SagaId::new("s-1"), input);

        let result = ReserveInventory::new(repo.clone(), 3)
            .forward(&ctx)
            .await
            .unwrap();
        assert_eq!(repo.in_stock(&ProductId::new("p1")).await, Some(4));

        let release = ReleaseInventory::new(repo.clone(), 3);
        release.compensate(&ctx, &result).await.unwrap();
        assert_eq!(repo.in_stock(&ProductId::new("p1")).await, Some(5));

        release.compensate(&ctx, &result).await.unwrap();
        assert_eq!(repo.in_stock(&ProductId::new("p1")).await, Some(5));
    }
}
