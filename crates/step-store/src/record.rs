use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SagaId, StepState, Version};

/// Deterministic key identifying one logical step of one saga.
///
/// Derived purely from `(saga_id, step_name)`, so a retried saga computes the
/// same key and finds the record left by the earlier attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derives the key for a step within a saga.
    pub fn new(saga_id: &SagaId, step_name: &str) -> Self {
        Self(format!("{saga_id}/{step_name}"))
    }

    /// Wraps an already-derived key, e.g. one read back from storage.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry in a saga's append-only step journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// The saga this record belongs to.
    pub saga_id: SagaId,

    /// Position in the saga's journal. Assigned by the store on append.
    pub sequence: Version,

    /// The step name (e.g., "reserve_inventory").
    pub step_name: String,

    /// Key derived from `(saga_id, step_name)`.
    pub idempotency_key: IdempotencyKey,

    /// The outcome this record captures.
    pub state: StepState,

    /// Result of the forward action (set on `Succeeded`, carried forward
    /// on compensation records so they are self-describing).
    pub result_payload: Option<serde_json::Value>,

    /// Failure description for `Failed` and `CompensationFailed`.
    pub error: Option<String>,

    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

impl StepRecord {
    /// Creates a record for `step_name` in `state`; the sequence is filled
    /// in by the store.
    pub fn new(saga_id: SagaId, step_name: impl Into<String>, state: StepState) -> Self {
        let step_name = step_name.into();
        let idempotency_key = IdempotencyKey::new(&saga_id, &step_name);
        Self {
            saga_id,
            sequence: Version::initial(),
            step_name,
            idempotency_key,
            state,
            result_payload: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    /// Records a successful forward action and its result.
    pub fn succeeded(
        saga_id: SagaId,
        step_name: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        Self::new(saga_id, step_name, StepState::Succeeded).with_payload(Some(result))
    }

    /// Records a failed forward action.
    pub fn failed(saga_id: SagaId, step_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(saga_id, step_name, StepState::Failed).with_error(error)
    }

    /// Sets the result payload.
    pub fn with_payload(mut self, payload: Option<serde_json::Value>) -> Self {
        self.result_payload = payload;
        self
    }

    /// Sets the error description.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Checks that the key really is derived from this record's saga and step.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.step_name.is_empty() {
            return Err("step name must not be empty".to_string());
        }
        let expected = IdempotencyKey::new(&self.saga_id, &self.step_name);
        if self.idempotency_key != expected {
            return Err(format!(
                "idempotency key '{}' does not match saga '{}' step '{}'",
                self.idempotency_key, self.saga_id, self.step_name
            ));
        }
        if self.state == StepState::NotStarted {
            return Err("NotStarted is implied by absence and is never recorded".to_string());
        }
        Ok(())
    }
}
