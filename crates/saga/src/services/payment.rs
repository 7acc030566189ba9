//! Payment gateway trait, fault injection, and in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use common::{Money, ProductId, TransactionId, UserId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by a payment gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Payment declined: {0}")]
    Declined(String),

    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TransactionId),

    #[error("Refund rejected for {transaction_id}: {reason}")]
    RefundRejected {
        transaction_id: TransactionId,
        reason: String,
    },
}

/// Result of a successful charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeReceipt {
    pub transaction_id: TransactionId,
    pub amount: Money,
}

/// Trait for payment processing operations.
///
/// Charges are synchronous: the call returns once the gateway has accepted
/// or refused the payment.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges a user for a product.
    async fn charge(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        amount: Money,
    ) -> Result<ChargeReceipt, PaymentError>;

    /// Refunds a previous charge. Refunding twice is not an error.
    async fn refund(&self, transaction_id: &TransactionId) -> Result<(), PaymentError>;
}

/// What an injected fault does to the next gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Proceed,
    Decline,
    Outage,
}

/// Decides whether a gateway call should fail.
pub trait FaultInjector: Send + Sync + std::fmt::Debug {
    fn on_charge(&self) -> Fault;

    fn on_refund(&self) -> Fault {
        Fault::Proceed
    }
}

/// Never injects a fault.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn on_charge(&self) -> Fault {
        Fault::Proceed
    }
}

/// Declines or drops charges at random.
#[derive(Debug, Clone, Copy)]
pub struct RandomFaults {
    pub decline_rate: f64,
    pub outage_rate: f64,
}

impl RandomFaults {
    pub fn new(decline_rate: f64, outage_rate: f64) -> Self {
        Self {
            decline_rate: decline_rate.clamp(0.0, 1.0),
            outage_rate: outage_rate.clamp(0.0, 1.0),
        }
    }
}

impl FaultInjector for RandomFaults {
    fn on_charge(&self) -> Fault {
        let roll: f64 = rand::rng().random();
        if roll < self.decline_rate {
            Fault::Decline
        } else if roll < self.decline_rate + self.outage_rate {
            Fault::Outage
        } else {
            Fault::Proceed
        }
    }
}

/// Replays a fixed sequence of faults, then proceeds.
#[derive(Debug, Default)]
pub struct ScriptedFaults {
    charges: Mutex<VecDeque<Fault>>,
    refunds: Mutex<VecDeque<Fault>>,
}

impl ScriptedFaults {
    pub fn new(charges: impl IntoIterator<Item = Fault>) -> Self {
        Self {
            charges: Mutex::new(charges.into_iter().collect()),
            refunds: Mutex::default(),
        }
    }

    /// Queues faults for refunds.
    pub fn with_refunds(self, refunds: impl IntoIterator<Item = Fault>) -> Self {
        *self.refunds.lock().unwrap_or_else(PoisonError::into_inner) =
            refunds.into_iter().collect();
        self
    }
}

fn next_fault(queue: &Mutex<VecDeque<Fault>>) -> Fault {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
        .unwrap_or(Fault::Proceed)
}

impl FaultInjector for ScriptedFaults {
    fn on_charge(&self) -> Fault {
        next_fault(&self.charges)
    }

    fn on_refund(&self) -> Fault {
        next_fault(&self.refunds)
    }
}

#[derive(Debug, Clone)]
struct ChargeEntry {
    amount: Money,
    refunded: bool,
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    charges: HashMap<TransactionId, ChargeEntry>,
    charge_attempts: usize,
}

/// In-memory payment gateway for testing and local runs.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryPaymentState>>,
    faults: Arc<dyn FaultInjector>,
}

impl Default for InMemoryPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPaymentGateway {
    /// Creates a gateway that accepts every charge.
    pub fn new() -> Self {
        Self::with_faults(Arc::new(NoFaults))
    }

    /// Creates a gateway driven by the given fault injector.
    pub fn with_faults(faults: Arc<dyn FaultInjector>) -> Self {
        Self {
            state: Arc::default(),
            faults,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, InMemoryPaymentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of charges that have not been refunded.
    pub fn active_charge_count(&self) -> usize {
        self.state().charges.values().filter(|c| !c.refunded).count()
    }

    /// Returns the number of refunded charges.
    pub fn refund_count(&self) -> usize {
        self.state().charges.values().filter(|c| c.refunded).count()
    }

    /// Returns the number of charge calls received, including failed ones.
    pub fn charge_attempts(&self) -> usize {
        self.state().charge_attempts
    }

    /// Returns the sum of all charges that have not been refunded.
    pub fn captured_total(&self) -> Money {
        self.state()
            .charges
            .values()
            .filter(|c| !c.refunded)
            .map(|c| c.amount)
            .sum()
    }

    pub fn is_refunded(&self, transaction_id: &TransactionId) -> bool {
        self.state()
            .charges
            .get(transaction_id)
            .is_some_and(|c| c.refunded)
    }
}

/// Builds `trans-<millis>-<user prefix>-<product prefix>`.
fn transaction_id(user_id: &UserId, product_id: &ProductId) -> String {
    let prefix = |s: &str| s.chars().take(4).collect::<String>();
    format!(
        "trans-{}-{}-{}",
        Utc::now().timestamp_millis(),
        prefix(user_id.as_str()),
        prefix(product_id.as_str())
    )
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    #[tracing::instrument(skip(self, amount), fields(amount = %amount))]
    async fn charge(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        amount: Money,
    ) -> Result<ChargeReceipt, PaymentError> {
        let fault = self.faults.on_charge();
        let mut state = self.state();
        state.charge_attempts += 1;

        match fault {
            Fault::Decline => return Err(PaymentError::Declined("card declined".to_string())),
            Fault::Outage => {
                return Err(PaymentError::Unavailable(
                    "gateway did not respond".to_string(),
                ));
            }
            Fault::Proceed => {}
        }

        let base = transaction_id(user_id, product_id);
        let mut id = TransactionId::new(base.clone());
        let mut suffix = 1;
        while state.charges.contains_key(&id) {
            suffix += 1;
            id = TransactionId::new(format!("{base}-{suffix}"));
        }

        state.charges.insert(
            id.clone(),
            ChargeEntry {
                amount,
                refunded: false,
            },
        );
        tracing::debug!(transaction_id = %id, "charge accepted");

        Ok(ChargeReceipt {
            transaction_id: id,
            amount,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn refund(&self, transaction_id: &TransactionId) -> Result<(), PaymentError> {
        match self.faults.on_refund() {
            Fault::Proceed => {}
            Fault::Decline => {
                return Err(PaymentError::RefundRejected {
                    transaction_id: transaction_id.clone(),
                    reason: "refund refused by issuer".to_string(),
                });
            }
            Fault::Outage => {
                return Err(PaymentError::Unavailable(
                    "gateway did not respond".to_string(),
                ));
            }
        }

        let mut state = self.state();
        let entry = state
            .charges
            .get_mut(transaction_id)
            .ok_or_else(|| PaymentError::UnknownTransaction(transaction_id.clone()))?;
        entry.refunded = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (UserId, ProductId) {
        (UserId::new("user-42"), ProductId::new("prod-7"))
    }

    #[tokio::test]
    async fn test_charge_and_refund() {
        let gateway = InMemoryPaymentGateway::new();
        let (user, product) = ids();

        let receipt = gateway
            .charge(&user, &product, Money::from_cents(5000))
            .await
            .unwrap();
        assert!(receipt.transaction_id.as_str().starts_with("trans-"));
        assert!(receipt.transaction_id.as_str().ends_with("-user-prod"));
        assert_eq!(gateway.active_charge_count(), 1);
        assert_eq!(gateway.captured_total(), Money::from_cents(5000));

        gateway.refund(&receipt.transaction_id).await.unwrap();
        assert_eq!(gateway.active_charge_count(), 0);
        assert!(gateway.is_refunded(&receipt.transaction_id));
    }

    #[tokio::test]
    async fn test_refund_is_idempotent() {
        let gateway = InMemoryPaymentGateway::new();
        let (user, product) = ids();
        let receipt = gateway
            .charge(&user, &product, Money::from_cents(100))
            .await
            .unwrap();

        gateway.refund(&receipt.transaction_id).await.unwrap();
        gateway.refund(&receipt.transaction_id).await.unwrap();
        assert_eq!(gateway.refund_count(), 1);
    }

    #[tokio::test]
    async fn test_refund_of_unknown_transaction_fails() {
        let gateway = InMemoryPaymentGateway::new();
        let result = gateway.refund(&TransactionId::new("trans-nope")).await;
        assert!(matches!(result, Err(PaymentError::UnknownTransaction(_))));
    }

    #[tokio::test]
    async fn test_scripted_faults() {
        let faults = ScriptedFaults::new([Fault::Outage, Fault::Decline]);
        let gateway = InMemoryPaymentGateway::with_faults(Arc::new(faults));
        let (user, product) = ids();
        let amount = Money::from_cents(100);

        assert!(matches!(
            gateway.charge(&user, &product, amount).await,
            Err(PaymentError::Unavailable(_))
        ));
        assert!(matches!(
            gateway.charge(&user, &product, amount).await,
            Err(PaymentError::Declined(_))
        ));
        assert!(gateway.charge(&user, &product, amount).await.is_ok());
        assert_eq!(gateway.charge_attempts(), 3);
        assert_eq!(gateway.active_charge_count(), 1);
    }

    #[tokio::test]
    async fn test_same_millisecond_charges_get_distinct_ids() {
        let gateway = InMemoryPaymentGateway::new();
        let (user, product) = ids();
        let amount = Money::from_cents(100);

        let first = gateway.charge(&user, &product, amount).await.unwrap();
        let second = gateway.charge(&user, &product, amount).await.unwrap();
        assert_ne!(first.transaction_id, second.transaction_id);
    }

    #[test]
    fn test_random_faults_extremes() {
        assert_eq!(RandomFaults::new(0.0, 0.0).on_charge(), Fault::Proceed);
        assert_eq!(RandomFaults::new(1.0, 0.0).on_charge(), Fault::Decline);
        assert_eq!(RandomFaults::new(0.0, 1.0).on_charge(), Fault::Outage);
        assert_eq!(RandomFaults::new(2.0, 0.0).decline_rate, 1.0);
    }
}
