//! Envelope settings for each remote call the saga makes.

use std::time::Duration;

use resilience::{Backoff, CircuitBreakerConfig, EnvelopeConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Resilience settings for the saga's collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    /// Reservation calls: timeout, retry, breaker.
    pub reserve: EnvelopeConfig,

    /// Charge calls: timeout and breaker, never retried.
    pub payment: EnvelopeConfig,

    /// Confirmation calls after payment.
    pub confirm: EnvelopeConfig,

    /// Cancel and refund calls during compensation.
    pub compensation: EnvelopeConfig,

    /// Breaker around the whole saga.
    pub saga_breaker: CircuitBreakerConfig,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            reserve: EnvelopeConfig {
                timeout: Some(Duration::from_secs(2)),
                retry: RetryPolicy {
                    max_attempts: 3,
                    backoff: Backoff::Exponential {
                        initial_delay: Duration::from_millis(100),
                        max_delay: Duration::from_secs(1),
                        multiplier: 2.0,
                    },
                    jitter: 0.1,
                    max_elapsed: Some(Duration::from_secs(10)),
                },
                circuit_breaker: Some(CircuitBreakerConfig::default()),
            },
            payment: EnvelopeConfig {
                timeout: Some(Duration::from_secs(5)),
                retry: RetryPolicy::none(),
                circuit_breaker: Some(CircuitBreakerConfig::default()),
            },
            confirm: EnvelopeConfig::timeout_only(Duration::from_secs(2)),
            compensation: EnvelopeConfig::timeout_only(Duration::from_secs(2)),
            saga_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl SagaConfig {
    /// Sets the retry budget for reservations.
    pub fn with_reserve_attempts(mut self, max_attempts: u32) -> Self {
        self.reserve.retry.max_attempts = max_attempts.max(1);
        self
    }

    /// Applies one breaker configuration to every breaker the saga owns.
    pub fn with_breakers(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.reserve.circuit_breaker = Some(breaker.clone());
        self.payment.circuit_breaker = Some(breaker.clone());
        self.saga_breaker = breaker;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_is_never_retried_by_default() {
        let config = SagaConfig::default();
        assert_eq!(config.payment.retry.max_attempts, 1);
        assert_eq!(config.compensation.retry.max_attempts, 1);
        assert!(config.reserve.retry.max_attempts > 1);
    }

    #[test]
    fn test_deserializes_partial_config() {
        let config: SagaConfig = serde_json::from_value(serde_json::json!({
            "payment": { "timeout": 250 }
        }))
        .unwrap();
        assert_eq!(config.payment.timeout, Some(Duration::from_millis(250)));
        assert!(config.payment.circuit_breaker.is_none());
        assert_eq!(config.reserve, SagaConfig::default().reserve);
    }
}
