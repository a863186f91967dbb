//! Bounded retry with exponential backoff, coordinated with the circuit
//! breaker.
//!
//! The policy consults the breaker before every attempt and reports each
//! outcome back to it, so one failing request contributes at most
//! `max_attempts` failures to the breaker's streak and a rejected attempt
//! contributes none.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use super::circuit_breaker::{CircuitBreaker, ConfigError};
use super::clock::Clock;

/// How an error should be treated by the retry loop and the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying: timeouts, connection errors, 5xx responses.
    Transient,
    /// Retrying cannot help: validation failures, conflicts, 4xx responses.
    Permanent,
}

/// Why a retried operation ultimately failed.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The breaker rejected the request before any attempt was made.
    #[error("circuit breaker is open; request not attempted")]
    CircuitOpen,
    /// A permanent error surfaced; no further attempts were made.
    #[error("permanent failure: {0}")]
    Permanent(#[source] E),
    /// Every allowed attempt failed transiently.
    #[error("giving up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    /// The underlying error, if one was observed.
    pub fn into_source(self) -> Option<E> {
        match self {
            RetryError::CircuitOpen => None,
            RetryError::Permanent(err) | RetryError::Exhausted { source: err, .. } => Some(err),
        }
    }
}

/// Configuration for retry behaviour.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per logical request, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after that.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::new("max_attempts must be greater than 0"));
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::new("base_delay must not exceed max_delay"));
        }
        Ok(())
    }
}

/// Retry loop shared by every backend call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { config: RetryConfig::default() }
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run `op` with retries, gated by `breaker`.
    ///
    /// `classify` decides per error whether another attempt is worthwhile.
    /// Transient failures are recorded on the breaker; permanent failures
    /// and breaker rejections are not.
    pub async fn run<C, T, E, K, F, Fut>(
        &self,
        breaker: &CircuitBreaker<C>,
        classify: K,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        C: Clock,
        K: Fn(&E) -> FailureKind,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            if !breaker.allow_request() {
                debug!(attempt, "request suppressed by open circuit");
                return Err(RetryError::CircuitOpen);
            }
            attempt += 1;

            match op().await {
                Ok(value) => {
                    breaker.record_success();
                    return Ok(value);
                }
                Err(err) => match classify(&err) {
                    FailureKind::Permanent => {
                        // A rejection is still an answer from the server:
                        // it clears the failure streak and releases a
                        // half-open probe ticket.
                        breaker.record_success();
                        debug!(attempt, error = %err, "permanent failure; not retrying");
                        return Err(RetryError::Permanent(err));
                    }
                    FailureKind::Transient => {
                        breaker.record_failure();
                        if attempt >= self.config.max_attempts {
                            warn!(attempt, error = %err, "retries exhausted");
                            return Err(RetryError::Exhausted { attempts: attempt, source: err });
                        }
                        let delay = self.backoff_delay(attempt);
                        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err,
                            "transient failure; backing off");
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }
    }

    /// Exponential delay for the given completed attempt number, with
    /// additive jitter of up to a quarter of the computed delay.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let scaled = self
            .config
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.config.max_delay);
        let jitter_ceiling = scaled.as_millis() as u64 / 4;
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ceiling)
        };
        scaled + Duration::from_millis(jitter)
    }
}
