//! Saga coordinator for marketplace purchases.
//!
//! A purchase runs three compensable steps in order:
//! 1. Reserve inventory
//! 2. Charge payment
//! 3. Record the order
//!
//! Every step outcome is journaled in an idempotency store keyed by
//! `(saga_id, step_name)`. If a step fails, previously completed steps are
//! compensated in reverse order. A compensation that fails ends the saga in
//! `FatalInconsistency` with an incident reference for operators.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod instance;
pub mod purchase;
pub mod registry;
pub mod retry;
pub mod services;
pub mod step;
pub mod steps;

pub use config::SagaConfig;
pub use coordinator::{SagaCoordinator, SagaOutcome, StepFailure};
pub use error::{ErrorKind, SagaError, StepError};
pub use instance::SagaInstance;
pub use purchase::{
    PurchaseInput, PurchaseOutcome, PurchaseRequest, PurchaseResult, PurchaseSaga, SAGA_TYPE,
    STEP_CHARGE_PAYMENT, STEP_RECORD_ORDER, STEP_RESERVE_INVENTORY, purchase_steps,
};
pub use registry::CompensationRegistry;
pub use services::{
    ChargeReceipt, Fault, FaultInjector, InMemoryPaymentGateway, LogNotifier, NoFaults,
    Notification, Notifier, PaymentError, PaymentGateway, RandomFaults, RecordingNotifier,
    ScriptedFaults,
};
pub use step::{Compensation, NoopCompensation, SagaContext, Step};
pub use step_store::{SagaState, StepState};
