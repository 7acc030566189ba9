//! Order recording and cancellation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, Utc};
use common::OrderId;
use marketplace::{MarketplaceRepository, Order, OrderPatch, OrderStatus};
use serde_json::Value;

use crate::error::StepError;
use crate::purchase::{
    PurchaseInput, STEP_CHARGE_PAYMENT, STEP_RECORD_ORDER, STEP_RESERVE_INVENTORY,
};
use crate::services::{ChargeReceipt, Notifier, dispatch};
use crate::step::{Compensation, SagaContext, Step, decode_result, encode_result};
use crate::steps::inventory::Reservation;

/// The message sent to the user once an order is confirmed.
pub fn confirmation_message(order: &Order) -> String {
    format!(
        "Your order for {} has been confirmed! Estimated delivery: {}",
        order.product_name, order.delivery_date
    )
}

/// Persists the confirmed order and notifies the user.
pub struct RecordOrder<R> {
    repo: R,
    notifier: Arc<dyn Notifier>,
    delivery_days: u32,
}

impl<R> RecordOrder<R> {
    pub fn new(repo: R, notifier: Arc<dyn Notifier>, delivery_days: u32) -> Self {
        Self {
            repo,
            notifier,
            delivery_days,
        }
    }
}

#[async_trait]
impl<R: MarketplaceRepository> Step<PurchaseInput> for RecordOrder<R> {
    fn name(&self) -> &str {
        STEP_RECORD_ORDER
    }

    async fn forward(&self, ctx: &SagaContext<PurchaseInput>) -> Result<Value, StepError> {
        let input = ctx.input();
        let reservation: Reservation = ctx.result_as(STEP_RESERVE_INVENTORY)?;
        let receipt: ChargeReceipt = ctx.result_as(STEP_CHARGE_PAYMENT)?;

        let now = Utc::now();
        let today = now.date_naive();
        let delivery_date = today
            .checked_add_days(Days::new(u64::from(self.delivery_days)))
            .unwrap_or(today);

        let order = Order {
            id: OrderId::generate(),
            user_id: input.user_id.clone(),
            product_id: input.product_id.clone(),
            product_name: reservation.product_name,
            quantity: reservation.quantity,
            price: receipt.amount,
            transaction_id: receipt.transaction_id,
            status: OrderStatus::Confirmed,
            created_at: now,
            delivery_date,
        };
        let order = self.repo.create_order(order).await?;
        tracing::info!(order_id = %order.id, %delivery_date, "order recorded");

        dispatch(
            self.notifier.clone(),
            order.user_id.clone(),
            confirmation_message(&order),
        );

        encode_result(STEP_RECORD_ORDER, &order)
    }
}

/// Marks the recorded order cancelled.
#[derive(Debug, Clone)]
pub struct CancelOrder<R> {
    repo: R,
}

impl<R> CancelOrder<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl<R: MarketplaceRepository> Compensation<PurchaseInput> for CancelOrder<R> {
    async fn compensate(
        &self,
        _ctx: &SagaContext<PurchaseInput>,
        result: &Value,
    ) -> Result<(), StepError> {
        let order: Order = decode_result(STEP_RECORD_ORDER, result)?;
        self.repo
            .update_order(&order.id, OrderPatch::status(OrderStatus::Cancelled))
            .await?;
        tracing::info!(order_id = %order.id, "order cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::RecordingNotifier;
    use chrono::NaiveDate;
    use common::{Money, ProductId, SagaId, TransactionId, UserId};
    use marketplace::InMemoryMarketplace;
    use std::time::Duration;

    fn ctx() -> SagaContext<PurchaseInput> {
        let mut ctx = SagaContext::new(
            SagaId::new("saga-1"),
            PurchaseInput {
                user_id: UserId::new("u1"),
                product_id: ProductId::new("p1"),
                quantity: 1,
                shipping_address: "12 High St".to_string(),
            },
        );
        ctx.record(
            STEP_RESERVE_INVENTORY,
            serde_json::to_value(Reservation {
                product_id: ProductId::new("p1"),
                product_name: "Laptop".to_string(),
                unit_price: Money::from_cents(99_900),
                quantity: 1,
                previous_stock: 3,
            })
            .unwrap(),
        );
        ctx.record(
            STEP_CHARGE_PAYMENT,
            serde_json::to_value(ChargeReceipt {
                transaction_id: TransactionId::new("trans-1-u1-p1"),
                amount: Money::from_cents(99_900),
            })
            .unwrap(),
        );
        ctx
    }

    #[test]
    fn confirmation_message_names_product_and_date() {
        let order = Order {
            id: OrderId::new("order-1"),
            user_id: UserId::new("u1"),
            product_id: ProductId::new("p1"),
            product_name: "Laptop".to_string(),
            quantity: 1,
            price: Money::from_cents(1),
            transaction_id: TransactionId::new("trans-1"),
            status: OrderStatus::Confirmed,
            created_at: Utc::now(),
            delivery_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        };
        assert_eq!(
            confirmation_message(&order),
            "Your order for Laptop has been confirmed! Estimated delivery: 2026-03-14"
        );
    }

    #[tokio::test]
    async fn records_confirmed_order_and_notifies() {
        let repo = InMemoryMarketplace::new();
        let notifier = RecordingNotifier::new();
        let step = RecordOrder::new(repo.clone(), Arc::new(notifier.clone()), 3);

        let result = step.forward(&ctx()).await.unwrap();
        let order: Order = serde_json::from_value(result).unwrap();

        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.price, Money::from_cents(99_900));
        assert_eq!(order.transaction_id, TransactionId::new("trans-1-u1-p1"));
        assert_eq!(
            order.delivery_date,
            order.created_at.date_naive() + Days::new(3)
        );
        assert_eq!(repo.order_count().await, 1);

        for _ in 0..50 {
            if !notifier.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(notifier.sent()[0].message, confirmation_message(&order));
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_step() {
        let repo = InMemoryMarketplace::new();
        let notifier = RecordingNotifier::new();
        notifier.set_failing(true);
        let step = RecordOrder::new(repo.clone(), Arc::new(notifier), 3);

        assert!(step.forward(&ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_marks_order_cancelled() {
        let repo = InMemoryMarketplace::new();
        let step = RecordOrder::new(repo.clone(), Arc::new(RecordingNotifier::new()), 3);
        let ctx = ctx();
        let result = step.forward(&ctx).await.unwrap();

        let cancel = CancelOrder::new(repo.clone());
        cancel.compensate(&ctx, &result).await.unwrap();
        cancel.compensate(&ctx, &result).await.unwrap();

        let orders = repo.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_fails_when_store_is_down() {
        let repo = InMemoryMarketplace::new();
        let step = RecordOrder::new(repo.clone(), Arc::new(RecordingNotifier::new()), 3);
        let ctx = ctx();
        let result = step.forward(&ctx).await.unwrap();
        repo.set_fail_order_updates(true);

        let err = CancelOrder::new(repo)
            .compensate(&ctx, &result)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::RepositoryUnavailable(_)));
    }
}
