//! External collaborators used by the purchase steps.

pub mod notification;
pub mod payment;

pub use notification::{
    LogNotifier, Notification, Notifier, NotifyError, RecordingNotifier, dispatch,
};
pub use payment::{
    ChargeReceipt, Fault, FaultInjector, InMemoryPaymentGateway, NoFaults, PaymentError,
    PaymentGateway, RandomFaults, ScriptedFaults,
};
