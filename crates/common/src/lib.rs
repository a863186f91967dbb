//! # Tillsync Common
//!
//! Resilience primitives shared by every backend-calling component:
//! a circuit breaker and a retry policy. Pure in-memory state machines with
//! no I/O of their own; higher layers inject them where network calls are
//! made.

pub mod resilience;

pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, FailureKind, MockClock,
    RetryConfig, RetryError, RetryPolicy, SystemClock,
};
