//! Idempotency store for saga step records.
//!
//! Every step outcome a saga produces is appended to a per-saga journal as a
//! [`StepRecord`]. Records are addressed by an [`IdempotencyKey`] derived from
//! `(saga_id, step_name)`, which is what lets a retried saga find a step that
//! already succeeded and reuse its result instead of re-applying the effect.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod saga;
pub mod state;
pub mod store;

pub use common::{SagaId, Version};
pub use error::{Result, StepStoreError};
pub use memory::InMemoryIdempotencyStore;
pub use postgres::PostgresIdempotencyStore;
pub use record::{IdempotencyKey, StepRecord};
pub use saga::SagaRecord;
pub use state::{SagaState, StepState};
pub use store::{IdempotencyStore, IdempotencyStoreExt};
