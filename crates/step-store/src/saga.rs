use chrono::{DateTime, Utc};
use common::IncidentId;
use serde::{Deserialize, Serialize};

use crate::{SagaId, SagaState};

/// Header row for a saga instance.
///
/// Unlike step records this is overwritten as the saga advances. Once the
/// state is terminal the header is the archived outcome, which is what a
/// retried saga returns without touching any step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub saga_id: SagaId,

    /// The kind of workflow (e.g., "Purchase").
    pub saga_type: String,

    pub state: SagaState,

    /// The step whose forward action failed, if any.
    pub failed_step: Option<String>,

    /// Why the saga failed, if it did.
    pub failure_reason: Option<String>,

    /// Set only for `FatalInconsistency`.
    pub incident_id: Option<IncidentId>,

    /// Final payload on `Completed`.
    pub result: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    /// Creates a new `Pending` header.
    pub fn new(saga_id: SagaId, saga_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            saga_type: saga_type.into(),
            state: SagaState::Pending,
            failed_step: None,
            failure_reason: None,
            incident_id: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the header to `state`, bumping `updated_at`.
    pub fn transition(&mut self, state: SagaState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}
