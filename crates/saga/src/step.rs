//! Step and compensation abstractions.

use std::collections::HashMap;

use async_trait::async_trait;
use common::SagaId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StepError;

/// Execution context shared by every step of one saga run.
///
/// Holds the saga input and the results of the steps that have succeeded so
/// far, keyed by step name.
#[derive(Debug, Clone)]
pub struct SagaContext<I> {
    saga_id: SagaId,
    input: I,
    results: HashMap<String, Value>,
}

impl<I> SagaContext<I> {
    pub fn new(saga_id: SagaId, input: I) -> Self {
        Self {
            saga_id,
            input,
            results: HashMap::new(),
        }
    }

    pub fn saga_id(&self) -> &SagaId {
        &self.saga_id
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    /// Returns the raw result of a succeeded step.
    pub fn result(&self, step: &str) -> Option<&Value> {
        self.results.get(step)
    }

    /// Deserializes the result of a succeeded step.
    pub fn result_as<T: DeserializeOwned>(&self, step: &str) -> Result<T, StepError> {
        let value = self.result(step).ok_or_else(|| StepError::InvalidResult {
            step: step.to_string(),
            reason: "step has not succeeded".to_string(),
        })?;
        decode_result(step, value)
    }

    pub(crate) fn record(&mut self, step: impl Into<String>, result: Value) {
        self.results.insert(step.into(), result);
    }
}

/// Deserializes a stored step result.
pub fn decode_result<T: DeserializeOwned>(step: &str, value: &Value) -> Result<T, StepError> {
    serde_json::from_value(value.clone()).map_err(|e| StepError::InvalidResult {
        step: step.to_string(),
        reason: e.to_string(),
    })
}

/// Serializes a step result for storage.
pub fn encode_result<T: Serialize>(step: &str, result: &T) -> Result<Value, StepError> {
    serde_json::to_value(result).map_err(|e| StepError::InvalidResult {
        step: step.to_string(),
        reason: e.to_string(),
    })
}

/// A named unit of work.
///
/// The name is the step's identity within a saga: together with the saga ID
/// it forms the idempotency key, so it must be unique within one saga.
#[async_trait]
pub trait Step<I>: Send + Sync {
    fn name(&self) -> &str;

    /// Performs the step and returns its result payload.
    async fn forward(&self, ctx: &SagaContext<I>) -> Result<Value, StepError>;
}

/// Reverses the effect of a succeeded step.
///
/// `result` is the payload the forward action returned. Implementations
/// must tolerate being called against state that is already reverted.
#[async_trait]
pub trait Compensation<I>: Send + Sync {
    async fn compensate(&self, ctx: &SagaContext<I>, result: &Value) -> Result<(), StepError>;
}

/// Compensation for steps without an external effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompensation;

#[async_trait]
impl<I: Send + Sync> Compensation<I> for NoopCompensation {
    async fn compensate(&self, _ctx: &SagaContext<I>, _result: &Value) -> Result<(), StepError> {
        Ok(())
    }
}
