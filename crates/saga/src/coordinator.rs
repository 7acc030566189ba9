//! Saga coordinator for orchestrating multi-step sagas.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use common::{IncidentId, SagaId, Version};
use serde::Serialize;
use serde_json::Value;
use step_store::{IdempotencyKey, IdempotencyStore, SagaRecord, SagaState, StepRecord, StepState};

use crate::config::SagaConfig;
use crate::error::{Result, SagaError, StepError};
use crate::instance::SagaInstance;
use crate::registry::CompensationRegistry;
use crate::retry::retry_transient;
use crate::step::{SagaContext, Step};

/// The step that stopped a saga and a reason safe to show the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailure {
    pub step: String,
    pub reason: String,
}

/// Terminal result of a saga run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all_fields = "camelCase")]
pub enum SagaOutcome {
    /// Every step succeeded; `result` is the last step's payload.
    Completed { saga_id: SagaId, result: Value },

    /// A step failed and every earlier effect was compensated.
    CompensatedFailure {
        saga_id: SagaId,
        failure: StepFailure,
    },

    /// A compensation failed; the listed steps need an operator.
    FatalInconsistency {
        saga_id: SagaId,
        failure: StepFailure,
        incident_id: IncidentId,
        failed_compensations: Vec<String>,
    },
}

impl SagaOutcome {
    pub fn saga_id(&self) -> &SagaId {
        match self {
            SagaOutcome::Completed { saga_id, .. }
            | SagaOutcome::CompensatedFailure { saga_id, .. }
            | SagaOutcome::FatalInconsistency { saga_id, .. } => saga_id,
        }
    }

    /// The saga state this outcome is archived under.
    pub fn state(&self) -> SagaState {
        match self {
            SagaOutcome::Completed { .. } => SagaState::Completed,
            SagaOutcome::CompensatedFailure { .. } => SagaState::CompensatedFailure,
            SagaOutcome::FatalInconsistency { .. } => SagaState::FatalInconsistency,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SagaOutcome::Completed { .. })
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            SagaOutcome::Completed { .. } => None,
            SagaOutcome::CompensatedFailure { failure, .. }
            | SagaOutcome::FatalInconsistency { failure, .. } => Some(failure),
        }
    }
}

/// Whether a compensation that already failed is invoked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Unwinding: a failed compensation stays failed.
    KeepFailed,
    /// Operator request: re-run it.
    Failed,
}

/// Releases a saga ID from the active set when a run ends.
struct ActiveSaga<'a> {
    active: &'a Mutex<HashSet<SagaId>>,
    saga_id: SagaId,
}

impl Drop for ActiveSaga<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.saga_id);
    }
}

/// Orchestrates the execution of sagas.
///
/// Steps run strictly in order. Each outcome is appended to the idempotency
/// store before the next step starts, so a retried saga reuses stored results
/// instead of repeating effects. When a step fails, every step that succeeded
/// is compensated in reverse completion order.
pub struct SagaCoordinator<S, I>
where
    S: IdempotencyStore,
{
    store: S,
    registry: CompensationRegistry<I>,
    config: SagaConfig,
    active: Mutex<HashSet<SagaId>>,
}

impl<S, I> SagaCoordinator<S, I>
where
    S: IdempotencyStore,
    I: Send + Sync + 'static,
{
    /// Creates a new saga coordinator.
    pub fn new(store: S, registry: CompensationRegistry<I>, config: SagaConfig) -> Self {
        Self {
            store,
            registry,
            config,
            active: Mutex::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &CompensationRegistry<I> {
        &self.registry
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    fn claim(&self, saga_id: &SagaId) -> Result<ActiveSaga<'_>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(saga_id.clone()) {
            return Err(SagaError::AlreadyRunning(saga_id.clone()));
        }
        Ok(ActiveSaga {
            active: &self.active,
            saga_id: saga_id.clone(),
        })
    }

    /// Runs `steps` for `saga_id` and returns the terminal outcome.
    ///
    /// A saga ID whose header is already terminal returns the archived
    /// outcome without running any step. A saga left `Running` or
    /// `Compensating` by an earlier attempt resumes from its journal.
    #[tracing::instrument(skip_all, fields(saga_id = %saga_id, saga_type = saga_type))]
    pub async fn run(
        &self,
        saga_id: SagaId,
        saga_type: &str,
        steps: &[Arc<dyn Step<I>>],
        input: I,
    ) -> Result<SagaOutcome> {
        self.registry.ensure_covers(steps)?;
        let _active = self.claim(&saga_id)?;

        let mut header = match self.store.get_saga(&saga_id).await? {
            Some(header) if header.state.is_terminal() => {
                tracing::info!(state = %header.state, "returning archived outcome");
                return self.archived_outcome(header).await;
            }
            Some(header) => header,
            None => {
                let header = SagaRecord::new(saga_id.clone(), saga_type);
                self.store.save_saga(header.clone()).await?;
                header
            }
        };

        metrics::counter!("saga_runs_total", "saga_type" => saga_type.to_string()).increment(1);
        let saga_start = Instant::now();

        let journal = self.store.records_for_saga(&saga_id).await?;
        let mut version = journal
            .last()
            .map(|r| r.sequence)
            .unwrap_or(Version::initial());
        let prior = SagaInstance::from_records(header.clone(), journal);
        let mut ctx = SagaContext::new(saga_id, input);

        let outcome = if header.state == SagaState::Compensating {
            tracing::info!("resuming interrupted compensation");
            for step in prior.completed_steps() {
                if let Some(result) = prior.succeeded_result(step) {
                    ctx.record(step.clone(), result.clone());
                }
            }
            let failure = StepFailure {
                step: header.failed_step.clone().unwrap_or_default(),
                reason: header.failure_reason.clone().unwrap_or_default(),
            };
            let completed = prior.completed_steps().to_vec();
            self.unwind(&mut header, &ctx, completed, failure, &mut version)
                .await?
        } else {
            header.transition(SagaState::Running);
            self.store.save_saga(header.clone()).await?;
            self.execute(&mut header, &mut ctx, steps, &prior, &mut version)
                .await?
        };

        metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Runs the forward actions in order, unwinding on the first failure.
    async fn execute(
        &self,
        header: &mut SagaRecord,
        ctx: &mut SagaContext<I>,
        steps: &[Arc<dyn Step<I>>],
        prior: &SagaInstance,
        version: &mut Version,
    ) -> Result<SagaOutcome> {
        let mut completed: Vec<String> = Vec::with_capacity(steps.len());
        let mut last_result = Value::Null;

        for step in steps {
            let name = step.name();

            if prior.step_state(name) == StepState::Succeeded
                && let Some(result) = prior.succeeded_result(name)
            {
                tracing::info!(step = name, "reused stored result");
                ctx.record(name, result.clone());
                completed.push(name.to_string());
                last_result = result.clone();
                continue;
            }

            tracing::info!(step = name, "step started");
            match self.forward(step.as_ref(), ctx).await {
                Ok(result) => {
                    let record =
                        StepRecord::succeeded(ctx.saga_id().clone(), name, result.clone());
                    *version = self.store.append(record, *version).await?;
                    tracing::info!(step = name, "step succeeded");

                    ctx.record(name, result.clone());
                    completed.push(name.to_string());
                    last_result = result;
                }
                Err(err) => {
                    tracing::warn!(step = name, error = %err, kind = ?err.kind(), "step failed");
                    let record = StepRecord::failed(ctx.saga_id().clone(), name, err.to_string());
                    *version = self.store.append(record, *version).await?;

                    let failure = StepFailure {
                        step: name.to_string(),
                        reason: err.user_message(),
                    };
                    return self.unwind(header, ctx, completed, failure, version).await;
                }
            }
        }

        header.result = Some(last_result.clone());
        header.transition(SagaState::Completed);
        self.store.save_saga(header.clone()).await?;

        metrics::counter!("saga_completed_total").increment(1);
        tracing::info!("saga completed successfully");

        Ok(SagaOutcome::Completed {
            saga_id: ctx.saga_id().clone(),
            result: last_result,
        })
    }

    /// One forward action under the retry policy.
    ///
    /// The step deadline bounds each attempt, not the backoff between them.
    async fn forward(
        &self,
        step: &dyn Step<I>,
        ctx: &SagaContext<I>,
    ) -> std::result::Result<Value, StepError> {
        let name = step.name();
        let deadline = self.config.step_timeout;

        retry_transient(name, &self.config, move || async move {
            match tokio::time::timeout(deadline, step.forward(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(StepError::Timeout {
                    step: name.to_string(),
                    timeout: deadline,
                }),
            }
        })
        .await
    }

    /// Compensates `completed` in reverse and archives the outcome.
    async fn unwind(
        &self,
        header: &mut SagaRecord,
        ctx: &SagaContext<I>,
        completed: Vec<String>,
        failure: StepFailure,
        version: &mut Version,
    ) -> Result<SagaOutcome> {
        let saga_id = ctx.saga_id().clone();
        header.failed_step = Some(failure.step.clone());
        header.failure_reason = Some(failure.reason.clone());

        if !completed.is_empty() {
            header.transition(SagaState::Compensating);
            self.store.save_saga(header.clone()).await?;
            tracing::info!(
                failed_step = %failure.step,
                steps = completed.len(),
                "compensation started"
            );
        }

        let mut failed_compensations = Vec::new();
        for step in completed.iter().rev() {
            let state = self
                .compensate_one(ctx, step, version, Retry::KeepFailed)
                .await?;
            if state == StepState::CompensationFailed {
                failed_compensations.push(step.clone());
            }
        }

        if failed_compensations.is_empty() {
            header.transition(SagaState::CompensatedFailure);
            self.store.save_saga(header.clone()).await?;

            metrics::counter!("saga_compensated_total").increment(1);
            tracing::info!(failed_step = %failure.step, reason = %failure.reason, "saga compensated");

            return Ok(SagaOutcome::CompensatedFailure { saga_id, failure });
        }

        let incident_id = IncidentId::new();
        header.incident_id = Some(incident_id);
        header.transition(SagaState::FatalInconsistency);
        self.store.save_saga(header.clone()).await?;

        metrics::counter!("saga_fatal_inconsistency_total").increment(1);
        tracing::error!(
            %incident_id,
            failed_step = %failure.step,
            ?failed_compensations,
            "fatal inconsistency: operator intervention required"
        );

        Ok(SagaOutcome::FatalInconsistency {
            saga_id,
            failure,
            incident_id,
            failed_compensations,
        })
    }

    /// Invokes one compensation at most once and records its outcome.
    ///
    /// A step whose latest record is already `Compensated` is skipped. One
    /// whose compensation already failed is only re-run on operator request.
    async fn compensate_one(
        &self,
        ctx: &SagaContext<I>,
        step: &str,
        version: &mut Version,
        retry: Retry,
    ) -> Result<StepState> {
        let key = IdempotencyKey::new(ctx.saga_id(), step);
        match self.store.latest(&key).await?.map(|r| r.state) {
            Some(StepState::Compensated) => {
                tracing::info!(step, "already compensated");
                return Ok(StepState::Compensated);
            }
            Some(StepState::CompensationFailed) if retry == Retry::KeepFailed => {
                tracing::warn!(step, "compensation failed earlier, left for an operator");
                return Ok(StepState::CompensationFailed);
            }
            _ => {}
        }

        let compensation = self
            .registry
            .get(step)
            .ok_or_else(|| SagaError::MissingCompensation(step.to_string()))?;
        let result = ctx.result(step).cloned().unwrap_or(Value::Null);

        tracing::info!(step, "compensating");
        let record = match compensation.compensate(ctx, &result).await {
            Ok(()) => {
                tracing::info!(step, "compensated");
                StepRecord::new(ctx.saga_id().clone(), step, StepState::Compensated)
            }
            Err(err) => {
                tracing::error!(step, error = %err, "compensation failed");
                StepRecord::new(ctx.saga_id().clone(), step, StepState::CompensationFailed)
                    .with_error(err.to_string())
            }
        };
        let state = record.state;
        *version = self
            .store
            .append(record.with_payload(Some(result)), *version)
            .await?;

        Ok(state)
    }

    /// Re-runs the compensation of one step on operator request.
    ///
    /// Used to clear a `CompensationFailed` record once the underlying fault
    /// is fixed. A step that is already compensated is not touched again.
    /// When the last failed compensation of a `FatalInconsistency` saga
    /// succeeds, the saga is archived as `CompensatedFailure`.
    #[tracing::instrument(skip(self, input), fields(saga_id = %saga_id))]
    pub async fn compensate_step(
        &self,
        saga_id: &SagaId,
        step: &str,
        input: I,
    ) -> Result<StepState> {
        let _active = self.claim(saga_id)?;
        let instance = self
            .get_saga(saga_id)
            .await?
            .ok_or_else(|| SagaError::SagaNotFound(saga_id.clone()))?;

        if !matches!(
            instance.state(),
            SagaState::FatalInconsistency | SagaState::CompensatedFailure
        ) {
            return Err(SagaError::InvalidState {
                expected: "FatalInconsistency or CompensatedFailure".to_string(),
                actual: instance.state(),
            });
        }

        match instance.step_state(step) {
            StepState::Compensated => return Ok(StepState::Compensated),
            StepState::Succeeded | StepState::CompensationFailed => {}
            state => {
                return Err(SagaError::NotCompensable {
                    step: step.to_string(),
                    state,
                });
            }
        }

        let mut ctx = SagaContext::new(saga_id.clone(), input);
        for name in instance.completed_steps() {
            if let Some(result) = instance.succeeded_result(name) {
                ctx.record(name.clone(), result.clone());
            }
        }

        let mut version = self.store.journal_version(saga_id).await?;
        let state = self
            .compensate_one(&ctx, step, &mut version, Retry::Failed)
            .await?;

        let unresolved = instance
            .failed_compensations()
            .into_iter()
            .filter(|s| s != step)
            .count();
        if state == StepState::Compensated
            && instance.state() == SagaState::FatalInconsistency
            && unresolved == 0
        {
            let mut header = instance.header().clone();
            header.transition(SagaState::CompensatedFailure);
            self.store.save_saga(header).await?;
            tracing::info!(incident_id = ?instance.incident_id(), "incident resolved");
        }

        Ok(state)
    }

    /// Rebuilds a saga instance from the store.
    pub async fn get_saga(&self, saga_id: &SagaId) -> Result<Option<SagaInstance>> {
        let Some(header) = self.store.get_saga(saga_id).await? else {
            return Ok(None);
        };
        let journal = self.store.records_for_saga(saga_id).await?;
        Ok(Some(SagaInstance::from_records(header, journal)))
    }

    async fn archived_outcome(&self, header: SagaRecord) -> Result<SagaOutcome> {
        let failure = StepFailure {
            step: header.failed_step.clone().unwrap_or_default(),
            reason: header.failure_reason.clone().unwrap_or_default(),
        };
        let saga_id = header.saga_id.clone();

        match header.state {
            SagaState::Completed => Ok(SagaOutcome::Completed {
                saga_id,
                result: header.result.unwrap_or(Value::Null),
            }),
            SagaState::CompensatedFailure => {
                Ok(SagaOutcome::CompensatedFailure { saga_id, failure })
            }
            SagaState::FatalInconsistency => {
                let incident_id = header.incident_id.unwrap_or_default();
                let journal = self.store.records_for_saga(&saga_id).await?;
                let instance = SagaInstance::from_records(header, journal);
                Ok(SagaOutcome::FatalInconsistency {
                    saga_id,
                    failure,
                    incident_id,
                    failed_compensations: instance.failed_compensations(),
                })
            }
            actual => Err(SagaError::InvalidState {
                expected: "a terminal state".to_string(),
                actual,
            }),
        }
    }
}
