//! The composed fault envelope.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::duration_ms;
use crate::error::{EnvelopeError, Retryable};
use crate::retry::RetryPolicy;

/// Settings for one envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Per-attempt timeout; `None` lets an attempt run unbounded.
    #[serde(default, with = "duration_ms::option")]
    pub timeout: Option<Duration>,

    /// Retry policy applied to retryable failures.
    #[serde(default = "RetryPolicy::none")]
    pub retry: RetryPolicy,

    /// Breaker settings; `None` disables the breaker.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(5)),
            retry: RetryPolicy::none(),
            circuit_breaker: None,
        }
    }
}

impl EnvelopeConfig {
    /// Timeout only: no retries, no breaker.
    pub fn timeout_only(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            retry: RetryPolicy::none(),
            circuit_breaker: None,
        }
    }
}

/// Timeout + retry + circuit breaker wrapper around one remote operation.
///
/// Clones share the same circuit breaker.
#[derive(Debug, Clone)]
pub struct FaultEnvelope {
    operation: String,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl FaultEnvelope {
    /// Creates an envelope for the named operation.
    pub fn new(operation: impl Into<String>, config: EnvelopeConfig) -> Self {
        let operation = operation.into();
        let breaker = config
            .circuit_breaker
            .map(|cfg| Arc::new(CircuitBreaker::new(operation.clone(), cfg)));
        Self {
            operation,
            timeout: config.timeout,
            retry: config.retry,
            breaker,
        }
    }

    /// Returns the operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Returns the breaker guarding this operation, if any.
    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Runs `op` inside the envelope.
    ///
    /// `op` is invoked once per attempt. Each attempt is bounded by the
    /// timeout and recorded by the breaker; retryable failures are attempted
    /// again per the retry policy. Breaker rejections are never retried.
    pub async fn call<T, E, F, Fut>(&self, mut op: F) -> Result<T, EnvelopeError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let started = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let err = match self.attempt(&mut op, attempts).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || !self.retry.allows_another(attempts) {
                return Err(err);
            }

            let delay = self.retry.delay_for_retry(attempts);
            if let Some(budget) = self.retry.max_elapsed
                && started.elapsed() + delay > budget
            {
                tracing::warn!(
                    operation = %self.operation,
                    attempts,
                    budget_ms = budget.as_millis() as u64,
                    "retry budget exhausted"
                );
                return Err(err);
            }

            tracing::warn!(
                operation = %self.operation,
                attempt = attempts,
                max_attempts = self.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, retrying: {err}"
            );
            metrics::counter!("envelope_retries_total", "operation" => self.operation.clone())
                .increment(1);
            tokio::time::sleep(delay).await;
        }
    }

    /// Runs `op` inside the envelope, mapping any final failure through
    /// `fallback` instead of returning it.
    pub async fn call_with_fallback<T, E, F, Fut, FB>(&self, op: F, fallback: FB) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
        FB: FnOnce(EnvelopeError<E>) -> T,
    {
        match self.call(op).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(operation = %self.operation, "falling back: {err}");
                metrics::counter!("envelope_fallbacks_total", "operation" => self.operation.clone())
                    .increment(1);
                fallback(err)
            }
        }
    }

    async fn attempt<T, E, F, Fut>(&self, op: &mut F, attempts: u32) -> Result<T, EnvelopeError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = match &self.breaker {
            Some(breaker) => match breaker.try_acquire() {
                Some(permit) => Some(permit),
                None => {
                    return Err(EnvelopeError::CircuitOpen {
                        operation: self.operation.clone(),
                    });
                }
            },
            None => None,
        };

        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result.map_err(|error| self.failed(attempts, error)),
                Err(_) => Err(EnvelopeError::Timeout {
                    operation: self.operation.clone(),
                    timeout,
                    attempts,
                }),
            },
            None => op().await.map_err(|error| self.failed(attempts, error)),
        };

        if let Some(permit) = permit {
            match result {
                Ok(_) => permit.record_success(),
                Err(_) => permit.record_failure(),
            }
        }

        result
    }

    fn failed<E>(&self, attempts: u32, error: E) -> EnvelopeError<E> {
        EnvelopeError::Failed {
            operation: self.operation.clone(),
            attempts,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::backoff::Backoff;
    use crate::circuit_breaker::CircuitState;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Unavailable,
        Rejected,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Unavailable => write!(f, "unavailable"),
                TestError::Rejected => write!(f, "rejected"),
            }
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Unavailable)
        }
    }

    fn retrying(max_attempts: u32) -> EnvelopeConfig {
        EnvelopeConfig {
            timeout: Some(Duration::from_millis(500)),
            retry: RetryPolicy {
                max_attempts,
                backoff: Backoff::Fixed {
                    delay: Duration::from_millis(100),
                },
                jitter: 0.0,
                max_elapsed: None,
            },
            circuit_breaker: None,
        }
    }

    fn with_breaker() -> EnvelopeConfig {
        EnvelopeConfig {
            circuit_breaker: Some(CircuitBreakerConfig {
                failure_rate_threshold: 50.0,
                sliding_window_size: 4,
                minimum_number_of_calls: 2,
                wait_duration_in_open_state: Duration::from_secs(30),
                permitted_calls_in_half_open_state: 1,
            }),
            ..retrying(1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let envelope = FaultEnvelope::new("test.op", retrying(3));
        let calls = AtomicU32::new(0);

        let result = envelope
            .call(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Unavailable)
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let envelope = FaultEnvelope::new("test.op", retrying(3));
        let calls = AtomicU32::new(0);

        let err = envelope
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Unavailable)
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 3);
        assert_eq!(err.into_inner(), Some(TestError::Unavailable));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_errors_fail_fast() {
        let envelope = FaultEnvelope::new("test.op", retrying(5));
        let calls = AtomicU32::new(0);

        let err = envelope
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Rejected)
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_then_reported() {
        let envelope = FaultEnvelope::new("test.op", retrying(2));
        let calls = AtomicU32::new(0);

        let err = envelope
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, TestError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EnvelopeError::Timeout { attempts: 2, timeout, .. }
                if timeout == Duration::from_millis(500)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_budget_stops_retries() {
        let mut config = retrying(10);
        config.retry.max_elapsed = Some(Duration::from_millis(250));
        let envelope = FaultEnvelope::new("test.op", config);
        let calls = AtomicU32::new(0);

        let _ = envelope
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Unavailable)
            })
            .await;

        // Attempts at t=0, 100ms, 200ms; the next delay would exceed the budget.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_short_circuits_without_calling() {
        let envelope = FaultEnvelope::new("test.op", with_breaker());
        let calls = AtomicU32::new(0);
        let failing = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TestError::Unavailable)
        };

        let _ = envelope.call(failing).await;
        let _ = envelope.call(failing).await;
        assert_eq!(
            envelope.breaker().unwrap().state(),
            CircuitState::Open
        );

        let err = envelope.call(failing).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_call_releases_half_open_slot() {
        let envelope = FaultEnvelope::new("test.op", with_breaker());
        for _ in 0..2 {
            let _ = envelope
                .call(|| async { Err::<(), _>(TestError::Unavailable) })
                .await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        // The caller gives up while the trial call is still in flight.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            envelope.call(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, TestError>(())
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(envelope.breaker().unwrap().state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        envelope
            .call(|| async { Ok::<_, TestError>(()) })
            .await
            .unwrap();
        assert_eq!(envelope.breaker().unwrap().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_breaker() {
        let envelope = FaultEnvelope::new("test.op", with_breaker());
        let clone = envelope.clone();

        for _ in 0..2 {
            let _ = clone
                .call(|| async { Err::<(), _>(TestError::Unavailable) })
                .await;
        }

        let err = envelope
            .call(|| async { Ok::<_, TestError>(()) })
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_receives_final_error() {
        let envelope = FaultEnvelope::new("test.op", retrying(2));

        let value = envelope
            .call_with_fallback(
                || async { Err::<String, _>(TestError::Unavailable) },
                |err| format!("degraded after {} attempts", err.attempts()),
            )
            .await;

        assert_eq!(value, "degraded after 2 attempts");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_not_used_on_success() {
        let envelope = FaultEnvelope::new("test.op", retrying(2));
        let value = envelope
            .call_with_fallback(
                || async { Ok::<_, TestError>("live".to_string()) },
                |_| "degraded".to_string(),
            )
            .await;
        assert_eq!(value, "live");
    }
}
