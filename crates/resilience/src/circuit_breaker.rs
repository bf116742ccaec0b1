//! Count-based circuit breaker.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::duration_ms;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure percentage (0-100) at or above which the breaker opens.
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,

    /// Number of most recent outcomes kept in the rolling window.
    #[serde(default = "default_sliding_window_size")]
    pub sliding_window_size: usize,

    /// Outcomes required in the window before the failure rate is evaluated.
    #[serde(default = "default_minimum_number_of_calls")]
    pub minimum_number_of_calls: usize,

    /// Cooldown spent open before trial calls are admitted.
    #[serde(default = "default_wait_duration_in_open_state")]
    #[serde(with = "duration_ms")]
    pub wait_duration_in_open_state: Duration,

    /// Trial calls admitted while half-open.
    #[serde(default = "default_permitted_calls_in_half_open_state")]
    pub permitted_calls_in_half_open_state: u32,
}

const fn default_failure_rate_threshold() -> f64 {
    50.0
}

const fn default_sliding_window_size() -> usize {
    10
}

const fn default_minimum_number_of_calls() -> usize {
    5
}

const fn default_wait_duration_in_open_state() -> Duration {
    Duration::from_secs(30)
}

const fn default_permitted_calls_in_half_open_state() -> u32 {
    3
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: default_failure_rate_threshold(),
            sliding_window_size: default_sliding_window_size(),
            minimum_number_of_calls: default_minimum_number_of_calls(),
            wait_duration_in_open_state: default_wait_duration_in_open_state(),
            permitted_calls_in_half_open_state: default_permitted_calls_in_half_open_state(),
        }
    }
}

/// Observable breaker state.
///
/// State transitions:
/// ```text
/// Closed ──(failure rate ≥ threshold)──► Open ──(cooldown)──► HalfOpen
///    ▲                                    ▲                      │
///    └──────────(trials healthy)──────────┴──(trials failing)────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls flow through and outcomes are recorded.
    Closed,

    /// Calls are rejected until the cooldown elapses.
    Open,

    /// A limited number of trial calls decide whether to close again.
    HalfOpen,
}

impl CircuitState {
    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen {
        admitted: u32,
        successes: u32,
        failures: u32,
    },
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    /// `true` marks a failed call.
    window: VecDeque<bool>,
}

/// Process-wide breaker guarding one operation.
///
/// Share it behind an `Arc`; every caller of the guarded operation must see
/// the same window.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                window: VecDeque::with_capacity(config.sliding_window_size),
            }),
            config,
        }
    }

    /// Returns the name of the guarded operation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state, treating an elapsed cooldown as half-open.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        match inner.phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Failure percentage over the current window, once the minimum number
    /// of calls has been recorded.
    pub fn failure_rate(&self) -> Option<f64> {
        let inner = self.lock();
        self.window_failure_rate(&inner.window)
    }

    /// Asks for permission to make a call.
    ///
    /// The returned permit must be resolved with
    /// [`CallPermit::record_success`] or [`CallPermit::record_failure`]. A
    /// permit dropped unresolved counts as a failure, so an abandoned call
    /// never holds a half-open trial slot.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let mut inner = self.lock();
        match inner.phase {
            Phase::Closed => {}
            Phase::Open { until } => {
                if Instant::now() < until {
                    return None;
                }
                inner.phase = Phase::HalfOpen {
                    admitted: 1,
                    successes: 0,
                    failures: 0,
                };
                self.log_transition(CircuitState::HalfOpen);
            }
            Phase::HalfOpen {
                ref mut admitted, ..
            } => {
                if *admitted >= self.config.permitted_calls_in_half_open_state {
                    return None;
                }
                *admitted += 1;
            }
        }
        Some(CallPermit {
            breaker: self,
            resolved: false,
        })
    }

    /// Forces the breaker back to closed with an empty window.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.phase = Phase::Closed;
        inner.window.clear();
    }

    fn record(&self, failed: bool) {
        let mut inner = self.lock();
        match inner.phase {
            Phase::Closed => {
                if inner.window.len() >= self.config.sliding_window_size.max(1) {
                    inner.window.pop_front();
                }
                inner.window.push_back(failed);

                if let Some(rate) = self.window_failure_rate(&inner.window)
                    && rate >= self.config.failure_rate_threshold
                {
                    tracing::warn!(
                        breaker = %self.name,
                        failure_rate = rate,
                        "failure rate reached threshold"
                    );
                    self.open(&mut inner);
                }
            }
            // Outcomes of calls admitted before the breaker opened.
            Phase::Open { .. } => {}
            Phase::HalfOpen {
                ref mut successes,
                ref mut failures,
                ..
            } => {
                if failed {
                    *failures += 1;
                } else {
                    *successes += 1;
                }
                let (successes, failures) = (*successes, *failures);
                let permitted = self.config.permitted_calls_in_half_open_state.max(1);
                if successes + failures < permitted {
                    return;
                }

                let rate = f64::from(failures) * 100.0 / f64::from(permitted);
                if rate >= self.config.failure_rate_threshold {
                    self.open(&mut inner);
                } else {
                    inner.phase = Phase::Closed;
                    inner.window.clear();
                    self.log_transition(CircuitState::Closed);
                }
            }
        }
    }

    fn open(&self, inner: &mut Inner) {
        inner.phase = Phase::Open {
            until: Instant::now() + self.config.wait_duration_in_open_state,
        };
        inner.window.clear();
        self.log_transition(CircuitState::Open);
    }

    fn window_failure_rate(&self, window: &VecDeque<bool>) -> Option<f64> {
        if window.is_empty() || window.len() < self.config.minimum_number_of_calls {
            return None;
        }
        let failures = window.iter().filter(|failed| **failed).count();
        Some(failures as f64 * 100.0 / window.len() as f64)
    }

    fn log_transition(&self, to: CircuitState) {
        match to {
            CircuitState::Open => tracing::warn!(breaker = %self.name, "circuit breaker opened"),
            _ => tracing::info!(breaker = %self.name, state = %to, "circuit breaker transition"),
        }
        metrics::counter!(
            "circuit_breaker_transitions_total",
            "breaker" => self.name.clone(),
            "state" => to.as_str()
        )
        .increment(1);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections never panic midway, so a poisoned lock still holds
        // a consistent window.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Permission for one call through a [`CircuitBreaker`].
#[derive(Debug)]
#[must_use = "an unresolved permit is recorded as a failure when dropped"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    resolved: bool,
}

impl CallPermit<'_> {
    /// Records a successful call.
    pub fn record_success(mut self) {
        self.resolve(false);
    }

    /// Records a failed call.
    pub fn record_failure(mut self) {
        self.resolve(true);
    }

    fn resolve(&mut self, failed: bool) {
        self.resolved = true;
        self.breaker.record(failed);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::warn!(breaker = %self.breaker.name, "call abandoned before completing");
            self.resolve(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            sliding_window_size: 4,
            minimum_number_of_calls: 4,
            wait_duration_in_open_state: Duration::from_secs(10),
            permitted_calls_in_half_open_state: 2,
        }
    }

    fn call(breaker: &CircuitBreaker, failed: bool) -> bool {
        let Some(permit) = breaker.try_acquire() else {
            return false;
        };
        if failed {
            permit.record_failure();
        } else {
            permit.record_success();
        }
        true
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_closed_below_minimum_calls() {
        let breaker = CircuitBreaker::new("test", config());
        for _ in 0..3 {
            assert!(call(&breaker, true));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_rate(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold_and_rejects() {
        let breaker = CircuitBreaker::new("test", config());
        call(&breaker, false);
        call(&breaker, false);
        call(&breaker, true);
        assert_eq!(breaker.state(), CircuitState::Closed);
        call(&breaker, true);

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides_out_old_failures() {
        let breaker = CircuitBreaker::new("test", config());
        call(&breaker, true);
        for _ in 0..6 {
            call(&breaker, false);
        }
        call(&breaker, true);
        assert_eq!(breaker.failure_rate(), Some(25.0));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_cooldown_then_closes() {
        let breaker = CircuitBreaker::new("test", config());
        for _ in 0..4 {
            call(&breaker, true);
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let first = breaker.try_acquire().unwrap();
        let second = breaker.try_acquire().unwrap();
        // Only the permitted number of trial calls are admitted.
        assert!(breaker.try_acquire().is_none());

        first.record_success();
        second.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_trials_reopen() {
        let breaker = CircuitBreaker::new("test", config());
        for _ in 0..4 {
            call(&breaker, true);
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        assert!(call(&breaker, false));
        assert!(call(&breaker, true));

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_permit_counts_as_failure() {
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                permitted_calls_in_half_open_state: 1,
                ..config()
            },
        );
        for _ in 0..4 {
            call(&breaker, true);
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        drop(breaker.try_acquire().unwrap());
        assert_eq!(breaker.state(), CircuitState::Open);

        // The abandoned trial does not keep the breaker from closing later.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(call(&breaker, false));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes() {
        let breaker = CircuitBreaker::new("test", config());
        for _ in 0..4 {
            call(&breaker, true);
        }
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_some());
    }
}
