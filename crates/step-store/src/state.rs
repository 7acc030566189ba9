//! Saga and step state machines.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Running ──┬──────────────────────────────► Completed
///                       └──► Compensating ──┬──► CompensatedFailure
///                                           └──► FatalInconsistency
/// ```
///
/// A failure before any step succeeded goes straight from `Running` to
/// `CompensatedFailure`: there is nothing to compensate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Accepted but no step has run yet.
    #[default]
    Pending,

    /// Saga steps are being executed.
    Running,

    /// A step failed and compensating actions are in progress.
    Compensating,

    /// All steps completed successfully (terminal state).
    Completed,

    /// A step failed and every prior effect was compensated (terminal state).
    CompensatedFailure,

    /// A compensation failed; operator intervention is required (terminal state).
    FatalInconsistency,
}

impl SagaState {
    /// Returns true if the saga can begin running.
    pub fn can_run(&self) -> bool {
        matches!(self, SagaState::Pending | SagaState::Running)
    }

    /// Returns true if the saga can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaState::Running | SagaState::Compensating)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::CompensatedFailure | SagaState::FatalInconsistency
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Pending => "Pending",
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::CompensatedFailure => "CompensatedFailure",
            SagaState::FatalInconsistency => "FatalInconsistency",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(SagaState::Pending),
            "Running" => Ok(SagaState::Running),
            "Compensating" => Ok(SagaState::Compensating),
            "Completed" => Ok(SagaState::Completed),
            "CompensatedFailure" => Ok(SagaState::CompensatedFailure),
            "FatalInconsistency" => Ok(SagaState::FatalInconsistency),
            other => Err(format!("unknown saga state '{other}'")),
        }
    }
}

/// The recorded outcome of a single step within a saga.
///
/// `NotStarted` is never written; it is what a step reads as when the journal
/// has no record for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepState {
    #[default]
    NotStarted,
    Succeeded,
    Failed,
    Compensated,
    CompensationFailed,
}

impl StepState {
    /// Returns true if the step's forward effect is in place and not undone.
    pub fn needs_compensation(&self) -> bool {
        matches!(self, StepState::Succeeded)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::NotStarted => "NotStarted",
            StepState::Succeeded => "Succeeded",
            StepState::Failed => "Failed",
            StepState::Compensated => "Compensated",
            StepState::CompensationFailed => "CompensationFailed",
        }
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StepState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NotStarted" => Ok(StepState::NotStarted),
            "Succeeded" => Ok(StepState::Succeeded),
            "Failed" => Ok(StepState::Failed),
            "Compensated" => Ok(StepState::Compensated),
            "CompensationFailed" => Ok(StepState::CompensationFailed),
            other => Err(format!("unknown step state '{other}'")),
        }
    }
}
