use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    IdempotencyKey, Result, SagaId, SagaRecord, StepRecord, StepStoreError, Version,
    store::{IdempotencyStore, validate_record_for_append},
};

/// In-memory idempotency store.
///
/// Provides the same interface and the same optimistic concurrency check
/// as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyStore {
    journals: Arc<RwLock<HashMap<SagaId, Vec<StepRecord>>>>,
    sagas: Arc<RwLock<HashMap<SagaId, SagaRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryIdempotencyStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `Unavailable` (or recover).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the total number of step records stored.
    pub async fn record_count(&self) -> usize {
        self.journals.read().await.values().map(Vec::len).sum()
    }

    /// Clears all journals and headers.
    pub async fn clear(&self) {
        self.journals.write().await.clear();
        self.sagas.write().await.clear();
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StepStoreError::Unavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn append(&self, mut record: StepRecord, expected_version: Version) -> Result<Version> {
        self.check_available()?;
        validate_record_for_append(&record)?;

        let mut journals = self.journals.write().await;
        let journal = journals.entry(record.saga_id.clone()).or_default();

        let current_version = journal
            .last()
            .map(|r| r.sequence)
            .unwrap_or(Version::initial());

        if current_version != expected_version {
            return Err(StepStoreError::ConcurrencyConflict {
                saga_id: record.saga_id.clone(),
                expected: expected_version,
                actual: current_version,
            });
        }

        let next = current_version.next();
        record.sequence = next;
        tracing::debug!(
            saga_id = %record.saga_id,
            step = %record.step_name,
            state = %record.state,
            sequence = %next,
            "step record appended"
        );
        journal.push(record);

        Ok(next)
    }

    async fn records_for_saga(&self, saga_id: &SagaId) -> Result<Vec<StepRecord>> {
        self.check_available()?;
        let journals = self.journals.read().await;
        Ok(journals.get(saga_id).cloned().unwrap_or_default())
    }

    async fn latest(&self, key: &IdempotencyKey) -> Result<Option<StepRecord>> {
        self.check_available()?;
        let journals = self.journals.read().await;
        Ok(journals
            .values()
            .flat_map(|journal| journal.iter())
            .filter(|r| &r.idempotency_key == key)
            .max_by_key(|r| r.sequence)
            .cloned())
    }

    async fn journal_version(&self, saga_id: &SagaId) -> Result<Version> {
        self.check_available()?;
        let journals = self.journals.read().await;
        Ok(journals
            .get(saga_id)
            .and_then(|journal| journal.last())
            .map(|r| r.sequence)
            .unwrap_or(Version::initial()))
    }

    async fn save_saga(&self, saga: SagaRecord) -> Result<()> {
        self.check_available()?;
        let mut sagas = self.sagas.write().await;
        sagas.insert(saga.saga_id.clone(), saga);
        Ok(())
    }

    async fn get_saga(&self, saga_id: &SagaId) -> Result<Option<SagaRecord>> {
        self.check_available()?;
        let sagas = self.sagas.read().await;
        Ok(sagas.get(saga_id).cloned())
    }
}
