//! Fault-tolerance envelope for remote calls.
//!
//! A [`FaultEnvelope`] wraps a single async operation with, from the inside
//! out: a per-attempt timeout, a circuit breaker, a retry loop, and an
//! optional fallback:
//!
//! ```text
//! Fallback(Retry(CircuitBreaker(Timeout(call))))
//! ```
//!
//! The envelope holds no business state. The only shared state is the
//! circuit breaker's rolling window, shared by every clone of the envelope.

pub mod backoff;
pub mod circuit_breaker;
pub mod envelope;
pub mod error;
pub mod retry;

mod duration_ms;

pub use backoff::Backoff;
pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use envelope::{EnvelopeConfig, FaultEnvelope};
pub use error::{EnvelopeError, Retryable};
pub use retry::RetryPolicy;
