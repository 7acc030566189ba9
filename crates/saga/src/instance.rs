//! Saga instance view rebuilt from the idempotency store.

use common::{IncidentId, SagaId};
use serde::Serialize;
use step_store::{SagaRecord, SagaState, StepRecord, StepState};

/// A saga instance: its header plus the step journal.
///
/// Folded from [`StepRecord`]s in append order, the way an aggregate is
/// rebuilt from its events.
#[derive(Debug, Clone, Serialize)]
pub struct SagaInstance {
    header: SagaRecord,
    journal: Vec<StepRecord>,
    /// Latest record per step, in order of first appearance.
    steps: Vec<StepRecord>,
    /// Step names in the order they succeeded.
    completed_steps: Vec<String>,
}

impl SagaInstance {
    /// Rebuilds an instance from its header and journal.
    pub fn from_records(header: SagaRecord, journal: Vec<StepRecord>) -> Self {
        let mut instance = Self {
            header,
            journal: Vec::with_capacity(journal.len()),
            steps: Vec::new(),
            completed_steps: Vec::new(),
        };
        for record in journal {
            instance.apply(record);
        }
        instance
    }

    fn apply(&mut self, record: StepRecord) {
        if record.state == StepState::Succeeded
            && !self.completed_steps.contains(&record.step_name)
        {
            self.completed_steps.push(record.step_name.clone());
        }
        match self
            .steps
            .iter_mut()
            .find(|r| r.step_name == record.step_name)
        {
            Some(latest) => *latest = record.clone(),
            None => self.steps.push(record.clone()),
        }
        self.journal.push(record);
    }
}

// Query methods
impl SagaInstance {
    pub fn saga_id(&self) -> &SagaId {
        &self.header.saga_id
    }

    pub fn saga_type(&self) -> &str {
        &self.header.saga_type
    }

    pub fn state(&self) -> SagaState {
        self.header.state
    }

    pub fn header(&self) -> &SagaRecord {
        &self.header
    }

    /// Every record in append order.
    pub fn journal(&self) -> &[StepRecord] {
        &self.journal
    }

    /// The latest record of each step that has one.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Step names in the order their forward actions succeeded.
    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    /// The current state of a step; `NotStarted` if it has no record.
    pub fn step_state(&self, step: &str) -> StepState {
        self.steps
            .iter()
            .find(|r| r.step_name == step)
            .map(|r| r.state)
            .unwrap_or(StepState::NotStarted)
    }

    /// Steps whose compensation failed and still need an operator.
    pub fn failed_compensations(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|r| r.state == StepState::CompensationFailed)
            .map(|r| r.step_name.clone())
            .collect()
    }

    /// The payload of the step's successful forward action, if any.
    pub fn succeeded_result(&self, step: &str) -> Option<&serde_json::Value> {
        self.journal
            .iter()
            .rev()
            .find(|r| r.step_name == step && r.state == StepState::Succeeded)
            .and_then(|r| r.result_payload.as_ref())
    }

    pub fn failed_step(&self) -> Option<&str> {
        self.header.failed_step.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.header.failure_reason.as_deref()
    }

    pub fn incident_id(&self) -> Option<IncidentId> {
        self.header.incident_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Version;
    use serde_json::json;

    fn journal(saga_id: &SagaId) -> Vec<StepRecord> {
        let mut records = vec![
            StepRecord::succeeded(saga_id.clone(), "a", json!(1)),
            StepRecord::succeeded(saga_id.clone(), "b", json!(2)),
            StepRecord::failed(saga_id.clone(), "c", "declined"),
            StepRecord::new(saga_id.clone(), "b", StepState::Compensated),
            StepRecord::new(saga_id.clone(), "a", StepState::CompensationFailed)
                .with_error("store down"),
        ];
        let mut version = Version::initial();
        for record in &mut records {
            version = version.next();
            record.sequence = version;
        }
        records
    }

    #[test]
    fn folds_latest_state_per_step() {
        let saga_id = SagaId::new("saga-1");
        let mut header = SagaRecord::new(saga_id.clone(), "Test");
        header.transition(SagaState::FatalInconsistency);

        let instance = SagaInstance::from_records(header, journal(&saga_id));

        assert_eq!(instance.state(), SagaState::FatalInconsistency);
        assert_eq!(instance.journal().len(), 5);
        assert_eq!(instance.steps().len(), 3);
        assert_eq!(instance.completed_steps(), &["a", "b"]);
        assert_eq!(instance.step_state("a"), StepState::CompensationFailed);
        assert_eq!(instance.step_state("b"), StepState::Compensated);
        assert_eq!(instance.step_state("c"), StepState::Failed);
        assert_eq!(instance.step_state("d"), StepState::NotStarted);
        assert_eq!(instance.failed_compensations(), vec!["a".to_string()]);
    }

    #[test]
    fn succeeded_result_survives_compensation() {
        let saga_id = SagaId::new("saga-1");
        let header = SagaRecord::new(saga_id.clone(), "Test");
        let instance = SagaInstance::from_records(header, journal(&saga_id));

        assert_eq!(instance.succeeded_result("b"), Some(&json!(2)));
        assert!(instance.succeeded_result("c").is_none());
    }
}
