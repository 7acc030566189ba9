//! Line-oriented driver for the purchase saga.
//!
//! Reads one JSON purchase request per line and writes one JSON purchase
//! result per line, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;

use std::path::Path;
use std::sync::Arc;

use marketplace::InMemoryMarketplace;
use saga::{
    FaultInjector, InMemoryPaymentGateway, LogNotifier, NoFaults, PurchaseOutcome,
    PurchaseRequest, PurchaseSaga, RandomFaults,
};
use step_store::InMemoryIdempotencyStore;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub use config::{Config, LogFormat};
pub use error::{Result, RunnerError};

/// The purchase saga wired to in-memory collaborators.
pub type RunnerSaga = PurchaseSaga<InMemoryMarketplace, InMemoryIdempotencyStore>;

/// Counts of what a run processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub compensated: usize,
    pub fatal: usize,
    pub malformed: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: PurchaseOutcome) {
        match outcome {
            PurchaseOutcome::Completed => self.completed += 1,
            PurchaseOutcome::CompensatedFailure => self.compensated += 1,
            PurchaseOutcome::FatalInconsistency => self.fatal += 1,
        }
    }
}

/// Seeds a marketplace from the JSON file at `path`.
pub async fn load_marketplace(path: &Path) -> Result<InMemoryMarketplace> {
    let json = tokio::fs::read_to_string(path).await?;
    let marketplace = InMemoryMarketplace::from_json(&json)?;
    tracing::info!(path = %path.display(), "marketplace seeded");
    Ok(marketplace)
}

/// Wires the purchase saga to in-memory collaborators.
pub fn build_saga(marketplace: InMemoryMarketplace, config: &Config) -> RunnerSaga {
    let faults: Arc<dyn FaultInjector> = if config.payment_failure_rate > 0.0 {
        Arc::new(RandomFaults::new(config.payment_failure_rate, 0.0))
    } else {
        Arc::new(NoFaults)
    };

    PurchaseSaga::new(
        marketplace,
        InMemoryIdempotencyStore::new(),
        Arc::new(InMemoryPaymentGateway::with_faults(faults)),
        Arc::new(LogNotifier),
        config.saga.clone(),
    )
}

/// Runs every request read from `reader` and writes each result to `writer`.
///
/// Blank lines are skipped. A line that is not a valid request gets an
/// `{"error": ...}` line in its place.
pub async fn process<R, W>(saga: &RunnerSaga, reader: R, mut writer: W) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut summary = RunSummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let output = match serde_json::from_str::<PurchaseRequest>(line) {
            Ok(request) => {
                let result = saga.purchase(request).await?;
                summary.record(result.outcome);
                serde_json::to_string(&result)?
            }
            Err(err) => {
                tracing::warn!(line = line_no, error = %err, "malformed purchase request");
                summary.malformed += 1;
                metrics::counter!("runner_malformed_requests_total").increment(1);
                serde_json::json!({ "error": err.to_string(), "line": line_no }).to_string()
            }
        };

        writer.write_all(output.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(summary)
}
