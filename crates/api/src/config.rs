//! Application configuration loaded from environment variables.

use std::time::Duration;

use resilience::CircuitBreakerConfig;
use saga::SagaConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL connection string; in-memory collaborators
///   are used when unset
/// - `PAYMENT_APPROVAL_RATE` — probability a charge is approved (default: `1.0`)
/// - `RESERVE_TIMEOUT_MS`, `RESERVE_MAX_ATTEMPTS`, `PAYMENT_TIMEOUT_MS`
/// - `BREAKER_FAILURE_RATE`, `BREAKER_MIN_CALLS`, `BREAKER_WINDOW`,
///   `BREAKER_OPEN_SECS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub payment_approval_rate: f64,
    pub reserve_timeout: Duration,
    pub reserve_max_attempts: u32,
    pub payment_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let breaker = CircuitBreakerConfig {
            failure_rate_threshold: lookup("BREAKER_FAILURE_RATE")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|rate| rate.is_finite() && (0.0..=100.0).contains(rate))
                .unwrap_or(defaults.breaker.failure_rate_threshold),
            minimum_number_of_calls: parsed("BREAKER_MIN_CALLS")
                .map(|n| n as usize)
                .unwrap_or(defaults.breaker.minimum_number_of_calls),
            sliding_window_size: parsed("BREAKER_WINDOW")
                .map(|n| n as usize)
                .unwrap_or(defaults.breaker.sliding_window_size),
            wait_duration_in_open_state: parsed("BREAKER_OPEN_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.breaker.wait_duration_in_open_state),
            ..defaults.breaker.clone()
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            payment_approval_rate: lookup("PAYMENT_APPROVAL_RATE")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|rate| rate.is_finite())
                .map(|rate| rate.clamp(0.0, 1.0))
                .unwrap_or(defaults.payment_approval_rate),
            reserve_timeout: parsed("RESERVE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reserve_timeout),
            reserve_max_attempts: parsed("RESERVE_MAX_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.reserve_max_attempts),
            payment_timeout: parsed("PAYMENT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.payment_timeout),
            breaker,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the saga's envelope settings.
    pub fn saga_config(&self) -> SagaConfig {
        let mut config = SagaConfig::default()
            .with_reserve_attempts(self.reserve_max_attempts)
            .with_breakers(self.breaker.clone());
        config.reserve.timeout = Some(self.reserve_timeout);
        config.payment.timeout = Some(self.payment_timeout);
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        let saga = SagaConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            payment_approval_rate: 1.0,
            reserve_timeout: saga.reserve.timeout.unwrap_or(Duration::from_secs(2)),
            reserve_max_attempts: saga.reserve.retry.max_attempts,
            payment_timeout: saga.payment.timeout.unwrap_or(Duration::from_secs(5)),
            breaker: saga.saga_breaker,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.payment_approval_rate, 1.0);
        assert_eq!(config.reserve_max_attempts, 3);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_reads_overrides() {
        let config = from_pairs(&[
            ("PORT", "8081"),
            ("DATABASE_URL", "postgres://localhost/saga"),
            ("PAYMENT_APPROVAL_RATE", "0.75"),
            ("RESERVE_TIMEOUT_MS", "300"),
            ("RESERVE_MAX_ATTEMPTS", "5"),
            ("BREAKER_MIN_CALLS", "2"),
            ("BREAKER_OPEN_SECS", "7"),
        ]);

        assert_eq!(config.port, 8081);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/saga")
        );
        assert_eq!(config.payment_approval_rate, 0.75);
        assert_eq!(config.reserve_timeout, Duration::from_millis(300));
        assert_eq!(config.breaker.minimum_number_of_calls, 2);
        assert_eq!(
            config.breaker.wait_duration_in_open_state,
            Duration::from_secs(7)
        );

        let saga = config.saga_config();
        assert_eq!(saga.reserve.retry.max_attempts, 5);
        assert_eq!(saga.reserve.timeout, Some(Duration::from_millis(300)));
        assert_eq!(saga.payment.retry.max_attempts, 1);
        assert_eq!(saga.saga_breaker.minimum_number_of_calls, 2);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "not-a-port"),
            ("PAYMENT_APPROVAL_RATE", "NaN"),
            ("BREAKER_FAILURE_RATE", "250"),
            ("DATABASE_URL", ""),
        ]);

        assert_eq!(config.port, 3000);
        assert_eq!(config.payment_approval_rate, 1.0);
        assert_eq!(config.breaker.failure_rate_threshold, 50.0);
        assert!(config.database_url.is_none());
    }
}
