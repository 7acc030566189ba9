use async_trait::async_trait;

use crate::{
    IdempotencyKey, Result, SagaId, SagaRecord, StepRecord, StepState, StepStoreError, Version,
};

/// Core trait for idempotency store implementations.
///
/// The store holds two things per saga: an append-only journal of
/// [`StepRecord`]s and a single [`SagaRecord`] header. All implementations
/// must be thread-safe (Send + Sync).
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Appends a record to the saga's journal.
    ///
    /// Fails with `ConcurrencyConflict` if the journal is no longer at
    /// `expected_version`. The record's `sequence` is overwritten with the
    /// assigned position, which is also the returned new journal version.
    async fn append(&self, record: StepRecord, expected_version: Version) -> Result<Version>;

    /// Returns the saga's journal in append order.
    async fn records_for_saga(&self, saga_id: &SagaId) -> Result<Vec<StepRecord>>;

    /// Returns the most recent record for a key, if any.
    async fn latest(&self, key: &IdempotencyKey) -> Result<Option<StepRecord>>;

    /// Returns the journal's current version (`Version::initial()` if empty).
    async fn journal_version(&self, saga_id: &SagaId) -> Result<Version>;

    /// Inserts or replaces the saga header.
    async fn save_saga(&self, saga: SagaRecord) -> Result<()>;

    /// Returns the saga header, if the saga is known.
    async fn get_saga(&self, saga_id: &SagaId) -> Result<Option<SagaRecord>>;
}

/// Extension trait providing convenience lookups.
#[async_trait]
pub trait IdempotencyStoreExt: IdempotencyStore {
    /// Returns the stored forward result if the step's latest record is
    /// `Succeeded`.
    async fn find_succeeded(&self, key: &IdempotencyKey) -> Result<Option<serde_json::Value>> {
        Ok(self
            .latest(key)
            .await?
            .filter(|record| record.state == StepState::Succeeded)
            .map(|record| record.result_payload.unwrap_or(serde_json::Value::Null)))
    }

    /// Returns the state of a step as the journal currently sees it.
    async fn step_state(&self, key: &IdempotencyKey) -> Result<StepState> {
        Ok(self
            .latest(key)
            .await?
            .map(|record| record.state)
            .unwrap_or_default())
    }
}

// Blanket implementation for all IdempotencyStore implementations
impl<T: IdempotencyStore + ?Sized> IdempotencyStoreExt for T {}

/// Validates a record before appending.
pub fn validate_record_for_append(record: &StepRecord) -> Result<()> {
    record.validate().map_err(StepStoreError::InvalidRecord)
}
