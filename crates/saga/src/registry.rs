//! Compensation registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Result, SagaError};
use crate::step::{Compensation, NoopCompensation, Step};

/// Maps step names to their compensating actions.
///
/// Every step of a saga must have an entry, even if it is a no-op, so the
/// coordinator's reverse unwind is defined for every prefix of the sequence.
pub struct CompensationRegistry<I> {
    entries: HashMap<String, Arc<dyn Compensation<I>>>,
}

impl<I> Default for CompensationRegistry<I> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<I: Send + Sync + 'static> CompensationRegistry<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the compensation for `step`.
    pub fn register(
        &mut self,
        step: impl Into<String>,
        compensation: Arc<dyn Compensation<I>>,
    ) -> &mut Self {
        self.entries.insert(step.into(), compensation);
        self
    }

    /// Registers a compensation that does nothing.
    pub fn register_noop(&mut self, step: impl Into<String>) -> &mut Self {
        self.register(step, Arc::new(NoopCompensation))
    }

    pub fn get(&self, step: &str) -> Option<Arc<dyn Compensation<I>>> {
        self.entries.get(step).cloned()
    }

    pub fn contains(&self, step: &str) -> bool {
        self.entries.contains_key(step)
    }

    /// Checks that `steps` is non-empty, has unique names that can form an
    /// idempotency key, and that every step has a compensation.
    pub fn ensure_covers(&self, steps: &[Arc<dyn Step<I>>]) -> Result<()> {
        if steps.is_empty() {
            return Err(SagaError::NoSteps);
        }
        let mut seen = HashSet::new();
        for step in steps {
            let name = step.name();
            if name.is_empty() || name.contains('/') {
                return Err(SagaError::InvalidStepName(name.to_string()));
            }
            if !seen.insert(name) {
                return Err(SagaError::DuplicateStep(name.to_string()));
            }
            if !self.contains(name) {
                return Err(SagaError::MissingCompensation(name.to_string()));
            }
        }
        Ok(())
    }
}

impl<I> std::fmt::Debug for CompensationRegistry<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut steps: Vec<_> = self.entries.keys().collect();
        steps.sort();
        f.debug_struct("CompensationRegistry")
            .field("steps", &steps)
            .finish()
    }
}
