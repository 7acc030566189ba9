//! Runner configuration loaded from environment variables.

use std::path::PathBuf;

use saga::SagaConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Runner configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON logs, anything else for human output
/// - `MARKETPLACE_DATA`: seed file (default: `"data/marketplace.json"`)
/// - `PAYMENT_FAILURE_RATE`: chance a charge is declined, 0.0-1.0 (default: `0.0`)
/// - `METRICS_DUMP`: log the Prometheus exposition on exit (default: `false`)
/// - `SAGA_*`: see [`SagaConfig`]
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    pub marketplace_data: PathBuf,
    pub payment_failure_rate: f64,
    pub metrics_dump: bool,
    pub saga: SagaConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT") {
                Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            marketplace_data: lookup("MARKETPLACE_DATA")
                .map(PathBuf::from)
                .unwrap_or(defaults.marketplace_data),
            payment_failure_rate: lookup("PAYMENT_FAILURE_RATE")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|rate| rate.is_finite())
                .map(|rate| rate.clamp(0.0, 1.0))
                .unwrap_or(defaults.payment_failure_rate),
            metrics_dump: lookup("METRICS_DUMP")
                .is_some_and(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes")),
            saga: SagaConfig::from_lookup(&lookup),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            marketplace_data: PathBuf::from("data/marketplace.json"),
            payment_failure_rate: 0.0,
            metrics_dump: false,
            saga: SagaConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = config_from(&[]);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(
            config.marketplace_data,
            PathBuf::from("data/marketplace.json")
        );
        assert_eq!(config.payment_failure_rate, 0.0);
        assert!(!config.metrics_dump);
        assert_eq!(config.saga, SagaConfig::default());
    }

    #[test]
    fn test_reads_overrides() {
        let config = config_from(&[
            ("RUST_LOG", "saga=debug"),
            ("LOG_FORMAT", "JSON"),
            ("MARKETPLACE_DATA", "/tmp/seed.json"),
            ("PAYMENT_FAILURE_RATE", "0.5"),
            ("METRICS_DUMP", "true"),
            ("SAGA_STEP_TIMEOUT_MS", "250"),
        ]);
        assert_eq!(config.log_level, "saga=debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.marketplace_data, PathBuf::from("/tmp/seed.json"));
        assert_eq!(config.payment_failure_rate, 0.5);
        assert!(config.metrics_dump);
        assert_eq!(config.saga.step_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_failure_rate_is_clamped() {
        assert_eq!(
            config_from(&[("PAYMENT_FAILURE_RATE", "7")]).payment_failure_rate,
            1.0
        );
        assert_eq!(
            config_from(&[("PAYMENT_FAILURE_RATE", "-1")]).payment_failure_rate,
            0.0
        );
        assert_eq!(
            config_from(&[("PAYMENT_FAILURE_RATE", "lots")]).payment_failure_rate,
            0.0
        );
    }
}
