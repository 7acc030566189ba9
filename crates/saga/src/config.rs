//! Coordinator configuration.

use std::time::Duration;

/// Retry and deadline policy for saga execution.
///
/// Reads from environment variables:
/// - `SAGA_STEP_TIMEOUT_MS`: deadline for one forward action (default: `5000`)
/// - `SAGA_TRANSIENT_RETRIES`: retries of a transient failure (default: `3`)
/// - `SAGA_RETRY_MIN_DELAY_MS` / `SAGA_RETRY_MAX_DELAY_MS`: backoff bounds (default: `10` / `500`)
/// - `SAGA_CAS_RETRIES`: compare-and-swap attempts on stock updates (default: `5`)
/// - `SAGA_DEFAULT_DELIVERY_DAYS`: delivery estimate for new orders (default: `3`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    pub step_timeout: Duration,
    pub transient_retries: usize,
    pub retry_min_delay: Duration,
    pub retry_max_delay: Duration,
    pub cas_retries: u32,
    pub default_delivery_days: u32,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(5),
            transient_retries: 3,
            retry_min_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(500),
            cas_retries: 5,
            default_delivery_days: 3,
        }
    }
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`; unset or unparsable values fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| {
            parsed(key).map(Duration::from_millis).unwrap_or(default)
        };

        Self {
            step_timeout: millis("SAGA_STEP_TIMEOUT_MS", defaults.step_timeout),
            transient_retries: parsed("SAGA_TRANSIENT_RETRIES")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(defaults.transient_retries),
            retry_min_delay: millis("SAGA_RETRY_MIN_DELAY_MS", defaults.retry_min_delay),
            retry_max_delay: millis("SAGA_RETRY_MAX_DELAY_MS", defaults.retry_max_delay),
            cas_retries: parsed("SAGA_CAS_RETRIES")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.cas_retries),
            default_delivery_days: parsed("SAGA_DEFAULT_DELIVERY_DAYS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.default_delivery_days),
        }
    }

    /// A configuration with no backoff delay, for tests.
    pub fn immediate() -> Self {
        Self {
            retry_min_delay: Duration::ZERO,
            retry_max_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = SagaConfig::default();
        assert_eq!(config.step_timeout, Duration::from_secs(5));
        assert_eq!(config.transient_retries, 3);
        assert_eq!(config.cas_retries, 5);
        assert_eq!(config.default_delivery_days, 3);
    }

    #[test]
    fn test_reads_overrides() {
        let config = SagaConfig::from_lookup(lookup(&[
            ("SAGA_STEP_TIMEOUT_MS", "250"),
            ("SAGA_TRANSIENT_RETRIES", "0"),
            ("SAGA_CAS_RETRIES", "9"),
        ]));
        assert_eq!(config.step_timeout, Duration::from_millis(250));
        assert_eq!(config.transient_retries, 0);
        assert_eq!(config.cas_retries, 9);
        assert_eq!(config.retry_max_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = SagaConfig::from_lookup(lookup(&[
            ("SAGA_STEP_TIMEOUT_MS", "soon"),
            ("SAGA_CAS_RETRIES", "0"),
        ]));
        assert_eq!(config, SagaConfig::default());
    }

    #[test]
    fn test_delays_are_read_in_milliseconds() {
        let config = SagaConfig::from_lookup(lookup(&[
            ("SAGA_RETRY_MIN_DELAY_MS", "40"),
            ("SAGA_RETRY_MAX_DELAY_MS", "1500"),
            ("SAGA_DEFAULT_DELIVERY_DAYS", "7"),
        ]));
        assert_eq!(config.retry_min_delay, Duration::from_millis(40));
        assert_eq!(config.retry_max_delay, Duration::from_millis(1500));
        assert_eq!(config.default_delivery_days, 7);
        assert_eq!(config.step_timeout, Duration::from_secs(5));
    }
}
