//! Payment charge and refund.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StepError;
use crate::purchase::{PurchaseInput, STEP_CHARGE_PAYMENT, STEP_RESERVE_INVENTORY};
use crate::services::{ChargeReceipt, PaymentGateway};
use crate::step::{Compensation, SagaContext, Step, decode_result, encode_result};
use crate::steps::inventory::Reservation;

/// Charges the user for the reserved quantity.
#[derive(Clone)]
pub struct ChargePayment {
    gateway: Arc<dyn PaymentGateway>,
}

impl ChargePayment {
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Step<PurchaseInput> for ChargePayment {
    fn name(&self) -> &str {
        STEP_CHARGE_PAYMENT
    }

    async fn forward(&self, ctx: &SagaContext<PurchaseInput>) -> Result<Value, StepError> {
        let input = ctx.input();
        let reservation: Reservation = ctx.result_as(STEP_RESERVE_INVENTORY)?;

        let receipt = self
            .gateway
            .charge(&input.user_id, &input.product_id, reservation.total())
            .await?;
        tracing::info!(
            transaction_id = %receipt.transaction_id,
            amount = %receipt.amount,
            "payment charged"
        );

        encode_result(STEP_CHARGE_PAYMENT, &receipt)
    }
}

/// Refunds the recorded charge.
#[derive(Clone)]
pub struct RefundPayment {
    gateway: Arc<dyn PaymentGateway>,
}

impl RefundPayment {
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Compensation<PurchaseInput> for RefundPayment {
    async fn compensate(
        &self,
        _ctx: &SagaContext<PurchaseInput>,
        result: &Value,
    ) -> Result<(), StepError> {
        let receipt: ChargeReceipt = decode_result(STEP_CHARGE_PAYMENT, result)?;
        self.gateway.refund(&receipt.transaction_id).await?;
        tracing::info!(transaction_id = %receipt.transaction_id, "payment refunded");
        Ok(())
    }
}
