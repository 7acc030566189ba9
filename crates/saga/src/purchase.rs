//! The purchase saga: reserve inventory, charge payment, record the order.

use std::sync::Arc;

use common::{IncidentId, ProductId, SagaId, UserId};
use marketplace::{MarketplaceRepository, Order};
use serde::{Deserialize, Serialize};
use step_store::IdempotencyStore;

use crate::config::SagaConfig;
use crate::coordinator::{SagaCoordinator, SagaOutcome};
use crate::error::{Result, StepError};
use crate::instance::SagaInstance;
use crate::registry::CompensationRegistry;
use crate::retry::retry_transient;
use crate::services::{Notifier, PaymentGateway};
use crate::step::Step;
use crate::steps::{
    CancelOrder, ChargePayment, RecordOrder, RefundPayment, ReleaseInventory, ReserveInventory,
};

/// The saga type identifier for purchases.
pub const SAGA_TYPE: &str = "Purchase";

/// Step name: Reserve inventory for the purchase.
pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";

/// Step name: Charge the user.
pub const STEP_CHARGE_PAYMENT: &str = "charge_payment";

/// Step name: Persist the confirmed order.
pub const STEP_RECORD_ORDER: &str = "record_order";

/// A purchase intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    /// Reusing an ID makes a retried request land in the same saga.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saga_id: Option<SagaId>,
    pub user_id: UserId,
    pub product_id: ProductId,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

impl PurchaseRequest {
    pub fn new(user_id: impl Into<UserId>, product_id: impl Into<ProductId>) -> Self {
        Self {
            saga_id: None,
            user_id: user_id.into(),
            product_id: product_id.into(),
            quantity: default_quantity(),
        }
    }

    pub fn with_saga_id(mut self, saga_id: impl Into<SagaId>) -> Self {
        self.saga_id = Some(saga_id.into());
        self
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }
}

/// Input shared by every purchase step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseInput {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub shipping_address: String,
}

/// Terminal outcome reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOutcome {
    Completed,
    CompensatedFailure,
    FatalInconsistency,
}

/// What the caller gets back from a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResult {
    pub saga_id: SagaId,
    pub outcome: PurchaseOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<IncidentId>,
}

impl PurchaseResult {
    /// A purchase refused before any step ran.
    fn rejected(saga_id: SagaId, reason: impl Into<String>) -> Self {
        Self {
            saga_id,
            outcome: PurchaseOutcome::CompensatedFailure,
            order: None,
            reason: Some(reason.into()),
            failed_step: None,
            incident_id: None,
        }
    }

    /// Maps a saga outcome to the caller-facing result.
    ///
    /// A fatal inconsistency only exposes an apology and the incident
    /// reference, never which steps were left in place.
    pub fn from_outcome(outcome: SagaOutcome) -> Result<Self> {
        let result = match outcome {
            SagaOutcome::Completed { saga_id, result } => Self {
                saga_id,
                outcome: PurchaseOutcome::Completed,
                order: Some(serde_json::from_value(result)?),
                reason: None,
                failed_step: None,
                incident_id: None,
            },
            SagaOutcome::CompensatedFailure { saga_id, failure } => Self {
                saga_id,
                outcome: PurchaseOutcome::CompensatedFailure,
                order: None,
                reason: Some(failure.reason),
                failed_step: Some(failure.step).filter(|s| !s.is_empty()),
                incident_id: None,
            },
            SagaOutcome::FatalInconsistency {
                saga_id,
                incident_id,
                ..
            } => Self {
                saga_id,
                outcome: PurchaseOutcome::FatalInconsistency,
                order: None,
                reason: Some(format!(
                    "We're sorry, something went wrong while processing your order. \
                     Our team has been notified (reference {incident_id})."
                )),
                failed_step: None,
                incident_id: Some(incident_id),
            },
        };
        Ok(result)
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == PurchaseOutcome::Completed
    }
}

/// Builds the three purchase steps and their compensation registry.
pub fn purchase_steps<R>(
    repo: R,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    config: &SagaConfig,
) -> (
    Vec<Arc<dyn Step<PurchaseInput>>>,
    CompensationRegistry<PurchaseInput>,
)
where
    R: MarketplaceRepository + Clone + 'static,
{
    let steps: Vec<Arc<dyn Step<PurchaseInput>>> = vec![
        Arc::new(ReserveInventory::new(repo.clone(), config.cas_retries)),
        Arc::new(ChargePayment::new(gateway.clone())),
        Arc::new(RecordOrder::new(
            repo.clone(),
            notifier,
            config.default_delivery_days,
        )),
    ];

    let mut registry = CompensationRegistry::new();
    registry
        .register(
            STEP_RESERVE_INVENTORY,
            Arc::new(ReleaseInventory::new(repo.clone(), config.cas_retries)),
        )
        .register(STEP_CHARGE_PAYMENT, Arc::new(RefundPayment::new(gateway)))
        .register(STEP_RECORD_ORDER, Arc::new(CancelOrder::new(repo)));

    (steps, registry)
}

/// Entry point for purchases.
///
/// Validates the user, then runs the purchase steps through the coordinator
/// and maps the outcome to a [`PurchaseResult`].
pub struct PurchaseSaga<R, S>
where
    S: IdempotencyStore,
{
    repo: R,
    coordinator: SagaCoordinator<S, PurchaseInput>,
    steps: Vec<Arc<dyn Step<PurchaseInput>>>,
}

impl<R, S> PurchaseSaga<R, S>
where
    R: MarketplaceRepository + Clone + 'static,
    S: IdempotencyStore,
{
    pub fn new(
        repo: R,
        store: S,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        config: SagaConfig,
    ) -> Self {
        let (steps, registry) = purchase_steps(repo.clone(), gateway, notifier, &config);
        Self {
            repo,
            coordinator: SagaCoordinator::new(store, registry, config),
            steps,
        }
    }

    pub fn coordinator(&self) -> &SagaCoordinator<S, PurchaseInput> {
        &self.coordinator
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Runs a purchase to a terminal outcome.
    #[tracing::instrument(
        skip(self, request),
        fields(user_id = %request.user_id, product_id = %request.product_id)
    )]
    pub async fn purchase(&self, request: PurchaseRequest) -> Result<PurchaseResult> {
        let saga_id = request.saga_id.unwrap_or_else(SagaId::generate);

        if request.quantity == 0 {
            return Ok(PurchaseResult::rejected(
                saga_id,
                StepError::InvalidQuantity(0).user_message(),
            ));
        }

        let lookup = retry_transient("validate_user", self.coordinator.config(), || async {
            self.repo
                .get_user(&request.user_id)
                .await
                .map_err(StepError::from)
        })
        .await;
        let user = match lookup {
            Ok(user) => user,
            Err(err) => {
                tracing::info!(error = %err, "purchase rejected before any step ran");
                return Ok(PurchaseResult::rejected(saga_id, err.user_message()));
            }
        };

        let input = PurchaseInput {
            user_id: request.user_id,
            product_id: request.product_id,
            quantity: request.quantity,
            shipping_address: user.address,
        };
        let outcome = self
            .coordinator
            .run(saga_id, SAGA_TYPE, &self.steps, input)
            .await?;

        PurchaseResult::from_outcome(outcome)
    }

    /// Rebuilds a purchase saga instance for inspection.
    pub async fn get_saga(&self, saga_id: &SagaId) -> Result<Option<SagaInstance>> {
        self.coordinator.get_saga(saga_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::StepFailure;

    #[test]
    fn request_defaults_quantity() {
        let request: PurchaseRequest =
            serde_json::from_str(r#"{"userId": "u1", "productId": "p1"}"#).unwrap();
        assert_eq!(request, PurchaseRequest::new("u1", "p1"));
        assert_eq!(request.quantity, 1);
        assert!(request.saga_id.is_none());
    }

    #[test]
    fn compensated_result_carries_reason_and_step() {
        let result = PurchaseResult::from_outcome(SagaOutcome::CompensatedFailure {
            saga_id: SagaId::new("s1"),
            failure: StepFailure {
                step: STEP_CHARGE_PAYMENT.to_string(),
                reason: "payment declined".to_string(),
            },
        })
        .unwrap();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "CompensatedFailure");
        assert_eq!(json["reason"], "payment declined");
        assert_eq!(json["failedStep"], "charge_payment");
        assert!(json.get("order").is_none());
    }

    #[test]
    fn fatal_result_hides_internal_state() {
        let incident_id = IncidentId::new();
        let result = PurchaseResult::from_outcome(SagaOutcome::FatalInconsistency {
            saga_id: SagaId::new("s1"),
            failure: StepFailure {
                step: "arrange_delivery".to_string(),
                reason: "service temporarily unavailable".to_string(),
            },
            incident_id,
            failed_compensations: vec![STEP_RECORD_ORDER.to_string()],
        })
        .unwrap();

        assert_eq!(result.outcome, PurchaseOutcome::FatalInconsistency);
        assert_eq!(result.incident_id, Some(incident_id));
        assert!(result.failed_step.is_none());
        let reason = result.reason.unwrap();
        assert!(reason.contains(&incident_id.to_string()));
        assert!(!reason.contains(STEP_RECORD_ORDER));
    }
}
