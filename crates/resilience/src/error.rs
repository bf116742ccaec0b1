//! Envelope error types.

use std::time::Duration;

use thiserror::Error;

/// Classifies whether an error may succeed if the call is attempted again.
///
/// Business rejections and contract violations are not retryable; transport
/// and availability problems are.
pub trait Retryable {
    /// Returns true if another attempt may succeed.
    fn is_retryable(&self) -> bool;
}

/// Final failure of a call made through a [`crate::FaultEnvelope`].
#[derive(Debug, Error)]
pub enum EnvelopeError<E> {
    /// The last attempt exceeded the configured timeout.
    #[error("{operation} timed out after {timeout:?} ({attempts} attempt(s))")]
    Timeout {
        operation: String,
        timeout: Duration,
        attempts: u32,
    },

    /// The circuit breaker rejected the call without attempting it.
    #[error("circuit breaker for {operation} is open")]
    CircuitOpen { operation: String },

    /// The operation itself returned an error on its last attempt.
    #[error("{operation} failed after {attempts} attempt(s): {error}")]
    Failed {
        operation: String,
        attempts: u32,
        error: E,
    },
}

impl<E> EnvelopeError<E> {
    /// Returns true if the call was short-circuited by an open breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, EnvelopeError::CircuitOpen { .. })
    }

    /// Returns the number of attempts made (zero when short-circuited).
    pub fn attempts(&self) -> u32 {
        match self {
            EnvelopeError::Timeout { attempts, .. } | EnvelopeError::Failed { attempts, .. } => {
                *attempts
            }
            EnvelopeError::CircuitOpen { .. } => 0,
        }
    }

    /// Returns the inner error if the operation itself failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            EnvelopeError::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl<E: Retryable> EnvelopeError<E> {
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            EnvelopeError::Timeout { .. } => true,
            EnvelopeError::CircuitOpen { .. } => false,
            EnvelopeError::Failed { error, .. } => error.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Flaky;

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky")
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_display_includes_operation_and_attempts() {
        let err = EnvelopeError::Failed {
            operation: "inventory.reserve".to_string(),
            attempts: 3,
            error: Flaky,
        };
        assert_eq!(
            err.to_string(),
            "inventory.reserve failed after 3 attempt(s): flaky"
        );
    }

    #[test]
    fn test_circuit_open_is_never_retried() {
        let err: EnvelopeError<Flaky> = EnvelopeError::CircuitOpen {
            operation: "payment.process".to_string(),
        };
        assert!(err.is_circuit_open());
        assert!(!err.is_retryable());
        assert_eq!(err.attempts(), 0);
    }

    #[test]
    fn test_timeouts_are_retryable() {
        let err: EnvelopeError<Flaky> = EnvelopeError::Timeout {
            operation: "inventory.reserve".to_string(),
            timeout: Duration::from_millis(100),
            attempts: 1,
        };
        assert!(err.is_retryable());
        assert!(err.into_inner().is_none());
    }
}
