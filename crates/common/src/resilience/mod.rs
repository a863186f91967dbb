//! Resilience patterns for calling an unreliable backend.
//!
//! The circuit breaker stops hammering a failing server; the retry policy
//! bounds how persistently a single request is attempted. Both are pure
//! state machines so tests can drive them deterministically with a
//! [`MockClock`].

mod circuit_breaker;
mod clock;
mod retry;

pub use circuit_breaker::{
    BreakerMetrics, CircuitBreaker, CircuitBreakerConfig, CircuitState, ConfigError,
    StateListener,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use retry::{FailureKind, RetryConfig, RetryError, RetryPolicy};
