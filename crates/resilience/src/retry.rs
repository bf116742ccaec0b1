//! Retry policy.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::duration_ms;

/// How many times, and how far apart, a failed call is attempted again.
///
/// Only errors that report themselves as retryable are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one; `1` disables retries.
    pub max_attempts: u32,

    /// Delay strategy between attempts.
    #[serde(default)]
    pub backoff: Backoff,

    /// Proportional jitter in `[0.0, 1.0]` applied to each delay.
    #[serde(default)]
    pub jitter: f64,

    /// Upper bound on the time spent across all attempts and delays.
    #[serde(default, with = "duration_ms::option")]
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            jitter: 0.0,
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Returns true if another attempt is allowed after `attempts` attempts.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the given retry (1-based), with jitter applied.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base = self.backoff.delay_for_retry(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        base.mul_f64(factor.max(0.0))
    }
}
