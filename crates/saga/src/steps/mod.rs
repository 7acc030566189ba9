//! The purchase steps and their compensations.

pub mod inventory;
pub mod order;
pub mod payment;

pub use inventory::{ReleaseInventory, Reservation, ReserveInventory, release_stock, reserve_stock};
pub use order::{CancelOrder, RecordOrder, confirmation_message};
pub use payment::{ChargePayment, RefundPayment};
