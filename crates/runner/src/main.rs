//! Runner entry point.

use runner::{Config, LogFormat, process};
use tokio::io::BufReader;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, stopping");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, stopping");
        }
    }
}

#[tokio::main]
async fn main() -> runner::Result<()> {
    let config = Config::from_env();

    // Logs go to stderr; stdout carries results.
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let marketplace = runner::load_marketplace(&config.marketplace_data).await?;
    let saga = runner::build_saga(marketplace, &config);
    tracing::info!(
        payment_failure_rate = config.payment_failure_rate,
        "reading purchase requests from stdin"
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    tokio::select! {
        summary = process(&saga, stdin, stdout) => {
            let summary = summary?;
            tracing::info!(
                completed = summary.completed,
                compensated = summary.compensated,
                fatal = summary.fatal,
                malformed = summary.malformed,
                "input exhausted"
            );
        }
        () = shutdown_signal() => {}
    }

    if config.metrics_dump {
        tracing::info!(metrics = %metrics_handle.render(), "metrics");
    }

    Ok(())
}
