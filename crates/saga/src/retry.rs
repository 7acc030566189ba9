//! Bounded retries for transient step failures.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::future::Future;

use backon::{ExponentialBuilder, Retryable};

use crate::config::SagaConfig;
use crate::error::StepError;

/// Backoff for re-invoking a forward action after a transient failure.
pub fn transient_backoff(config: &SagaConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(config.retry_min_delay)
        .with_max_delay(config.retry_max_delay)
        .with_max_times(config.transient_retries)
        .with_jitter()
}

/// Runs `action`, retrying it while it fails with a retryable error.
pub async fn retry_transient<T, F, Fut>(
    step: &str,
    config: &SagaConfig,
    action: F,
) -> Result<T, StepError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StepError>>,
{
    action
        .retry(transient_backoff(config))
        .when(StepError::is_retryable)
        .notify(|err, delay| {
            metrics::counter!("saga_step_retries_total", "step" => step.to_string()).increment(1);
            tracing::warn!(step, error = %err, ?delay, "transient step failure, retrying");
        })
        .await
}
