//! Delay strategies between retry attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration_ms;

/// Backoff strategy between retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed {
        #[serde(with = "duration_ms")]
        delay: Duration,
    },

    /// Delay grows geometrically up to a cap.
    Exponential {
        #[serde(with = "duration_ms")]
        initial_delay: Duration,

        #[serde(with = "duration_ms")]
        max_delay: Duration,

        /// Multiplier for each retry (default: 2.0).
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: default_multiplier(),
        }
    }
}

impl Backoff {
    /// Calculate the delay before the given retry (1-based).
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
                let delay_secs = initial_delay.as_secs_f64() * multiplier.powi(exponent);
                if !delay_secs.is_finite() || delay_secs >= max_delay.as_secs_f64() {
                    return *max_delay;
                }
                Duration::from_secs_f64(delay_secs)
            }
        }
    }
}
