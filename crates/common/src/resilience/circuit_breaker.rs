//! Circuit breaker guarding calls to the inventory backend.
//!
//! Tracks consecutive request failures and opens to suppress further calls
//! for a cooldown window. The open → half-open transition is computed lazily
//! whenever the breaker is consulted; there is no background timer, so a
//! breaker that is never queried never transitions. Half-open admits exactly
//! one probe: the probe's success closes the breaker, its failure reopens it
//! immediately.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests allowed; failures counted.
    Closed,
    /// Requests rejected locally without touching the network.
    Open,
    /// Exactly one probe request allowed through to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Invalid breaker configuration.
#[derive(Debug, Error)]
#[error("Invalid circuit breaker configuration: {message}")]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Configuration for circuit breaker behaviour.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time to wait after the last failure before admitting a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_millis(30_000) }
    }
}

impl CircuitBreakerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::new("failure_threshold must be greater than 0"));
        }
        if self.cooldown.is_zero() {
            return Err(ConfigError::new("cooldown must be greater than 0"));
        }
        Ok(())
    }
}

/// Observer invoked on every state transition.
///
/// Keeps presentation code decoupled from the breaker: the UI subscribes to
/// learn when writes should be disabled, the breaker knows nothing about it.
pub type StateListener = Arc<dyn Fn(CircuitState) + Send + Sync>;

/// Snapshot of breaker counters for observability.
#[derive(Debug, Clone, Copy)]
pub struct BreakerMetrics {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_opens: u64,
    pub total_rejections: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
    total_opens: u64,
    total_rejections: u64,
}

/// Process-wide request gate for a failing backend.
///
/// Clones share state; construct one per process and inject it into every
/// component that performs network calls.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
    listeners: Arc<Mutex<Vec<StateListener>>>,
    clock: Arc<C>,
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            listeners: Arc::clone(&self.listeners),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = self.metrics();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &metrics.state)
            .field("consecutive_failures", &metrics.consecutive_failures)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker with the given configuration and the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a breaker with default configuration.
    pub fn with_defaults() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            inner: Arc::new(Mutex::new(Inner::new())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            clock: Arc::new(SystemClock),
        }
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            probe_in_flight: false,
            total_opens: 0,
            total_rejections: 0,
        }
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Arc::new(Mutex::new(Inner::new())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            clock: Arc::new(clock),
        })
    }

    /// Register a listener invoked on every state transition.
    pub fn on_transition(&self, listener: StateListener) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
    }

    /// Whether a request may be attempted right now.
    ///
    /// Performs the lazy open → half-open transition once the cooldown has
    /// elapsed, and hands out the single half-open probe ticket. Returning
    /// `false` does not count as a failure anywhere.
    pub fn allow_request(&self) -> bool {
        let transition;
        let allowed;
        {
            let mut inner = self.lock_inner();
            transition = self.apply_lazy_transition(&mut inner);
            allowed = match inner.state {
                CircuitState::Closed => true,
                CircuitState::Open => false,
                CircuitState::HalfOpen => {
                    if inner.probe_in_flight {
                        false
                    } else {
                        inner.probe_in_flight = true;
                        true
                    }
                }
            };
            if !allowed {
                inner.total_rejections = inner.total_rejections.saturating_add(1);
            }
        }
        if let Some(state) = transition {
            debug!(state = %state, "circuit breaker admitted a recovery probe");
            self.notify(state);
        }
        allowed
    }

    /// Record a successful request. Resets the failure count unconditionally
    /// and closes the circuit from any state.
    pub fn record_success(&self) {
        let transition;
        {
            let mut inner = self.lock_inner();
            inner.consecutive_failures = 0;
            inner.probe_in_flight = false;
            transition = if inner.state == CircuitState::Closed {
                None
            } else {
                inner.state = CircuitState::Closed;
                Some(CircuitState::Closed)
            };
        }
        if let Some(state) = transition {
            info!("circuit breaker closed after successful probe");
            self.notify(state);
        }
    }

    /// Record a failed request.
    ///
    /// In the closed state the circuit opens once the threshold is reached.
    /// In half-open a single failed probe reopens immediately; trust must be
    /// re-earned by one clean success, not by re-reaching the threshold.
    pub fn record_failure(&self) {
        let transition;
        {
            let mut inner = self.lock_inner();
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            inner.last_failure_at = Some(self.clock.now());
            transition = match inner.state {
                CircuitState::Closed => {
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.total_opens = inner.total_opens.saturating_add(1);
                        Some(CircuitState::Open)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Open;
                    inner.probe_in_flight = false;
                    inner.total_opens = inner.total_opens.saturating_add(1);
                    Some(CircuitState::Open)
                }
                // Already open; the failure extended the cooldown window.
                CircuitState::Open => None,
            };
        }
        if let Some(state) = transition {
            warn!(state = %state, "circuit breaker opened");
            self.notify(state);
        }
    }

    /// Manual override for a user-initiated "try again": forces closed and
    /// zeroes all counters.
    pub fn reset(&self) {
        let transition;
        {
            let mut inner = self.lock_inner();
            transition = if inner.state == CircuitState::Closed {
                None
            } else {
                Some(CircuitState::Closed)
            };
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.last_failure_at = None;
            inner.probe_in_flight = false;
        }
        info!("circuit breaker manually reset to closed");
        if let Some(state) = transition {
            self.notify(state);
        }
    }

    /// Current state, applying the lazy transition but not consuming the
    /// probe ticket.
    pub fn state(&self) -> CircuitState {
        let transition;
        let state;
        {
            let mut inner = self.lock_inner();
            transition = self.apply_lazy_transition(&mut inner);
            state = inner.state;
        }
        if let Some(new_state) = transition {
            self.notify(new_state);
        }
        state
    }

    /// Counter snapshot for observability.
    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.lock_inner();
        BreakerMetrics {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_opens: inner.total_opens,
            total_rejections: inner.total_rejections,
        }
    }

    /// Transition open → half-open when the cooldown has elapsed since the
    /// last failure. Returns the new state when a transition happened.
    fn apply_lazy_transition(&self, inner: &mut MutexGuard<'_, Inner>) -> Option<CircuitState> {
        if inner.state != CircuitState::Open {
            return None;
        }
        let last_failure = inner.last_failure_at?;
        if self.clock.now().duration_since(last_failure) >= self.config.cooldown {
            inner.state = CircuitState::HalfOpen;
            inner.probe_in_flight = false;
            return Some(CircuitState::HalfOpen);
        }
        None
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn notify(&self, state: CircuitState) {
        let listeners = match self.listeners.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for listener in listeners {
            listener(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::super::clock::MockClock;
    use super::*;

    fn breaker(threshold: u32, cooldown: Duration) -> (CircuitBreaker<MockClock>, MockClock) {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig { failure_threshold: threshold, cooldown };
        let cb = CircuitBreaker::with_clock(config, clock.clone()).unwrap();
        (cb, clock)
    }

    #[test]
    fn config_validation_rejects_zero_threshold() {
        let config = CircuitBreakerConfig { failure_threshold: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = CircuitBreakerConfig { cooldown: Duration::ZERO, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_match_contract() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown, Duration::from_millis(30_000));
    }

    #[test]
    fn stays_closed_below_threshold() {
        let (cb, _clock) = breaker(3, Duration::from_secs(30));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn opens_at_threshold() {
        let (cb, _clock) = breaker(3, Duration::from_secs(30));

        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn success_resets_failure_count() {
        let (cb, _clock) = breaker(3, Duration::from_secs(30));

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.metrics().consecutive_failures, 0);

        // The streak starts over; three more failures open the circuit.
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn cooldown_admits_exactly_one_probe() {
        let (cb, clock) = breaker(1, Duration::from_secs(30));

        cb.record_failure();
        assert!(!cb.allow_request());

        clock.advance(Duration::from_secs(31));
        assert!(cb.allow_request(), "first query after cooldown gets the probe");
        assert!(!cb.allow_request(), "second query must wait for the probe's outcome");
    }

    #[test]
    fn failed_probe_reopens_immediately() {
        let (cb, clock) = breaker(3, Duration::from_secs(30));

        for _ in 0..3 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(31));
        assert!(cb.allow_request());

        // One failed probe is enough; the threshold does not apply here.
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn successful_probe_closes_and_resets() {
        // Property: threshold=3, three failures deny requests; after the
        // cooldown one probe is allowed, and its success closes the breaker
        // with failures back at zero.
        let (cb, clock) = breaker(3, Duration::from_secs(30));

        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.allow_request());

        clock.advance(Duration::from_secs(30));
        assert!(cb.allow_request());
        cb.record_success();

        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 0);
    }

    #[test]
    fn reopened_probe_restarts_cooldown() {
        let (cb, clock) = breaker(1, Duration::from_secs(30));

        cb.record_failure();
        clock.advance(Duration::from_secs(31));
        assert!(cb.allow_request());
        cb.record_failure();

        // Reopened just now; the old cooldown no longer applies.
        clock.advance(Duration::from_secs(10));
        assert!(!cb.allow_request());
        clock.advance(Duration::from_secs(21));
        assert!(cb.allow_request());
    }

    #[test]
    fn reset_forces_closed() {
        let (cb, _clock) = breaker(1, Duration::from_secs(30));

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 0);
        assert!(cb.allow_request());
    }

    #[test]
    fn listeners_observe_open_and_close() {
        let (cb, clock) = breaker(1, Duration::from_secs(30));
        let opens = Arc::new(AtomicU32::new(0));
        let closes = Arc::new(AtomicU32::new(0));

        let opens_clone = Arc::clone(&opens);
        let closes_clone = Arc::clone(&closes);
        cb.on_transition(Arc::new(move |state| match state {
            CircuitState::Open => {
                opens_clone.fetch_add(1, Ordering::SeqCst);
            }
            CircuitState::Closed => {
                closes_clone.fetch_add(1, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {}
        }));

        cb.record_failure();
        clock.advance(Duration::from_secs(31));
        assert!(cb.allow_request());
        cb.record_success();

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_state() {
        let (cb, _clock) = breaker(2, Duration::from_secs(30));
        let other = cb.clone();

        cb.record_failure();
        other.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(other.state(), CircuitState::Open);
    }

    #[test]
    fn rejections_are_counted() {
        let (cb, _clock) = breaker(1, Duration::from_secs(30));
        cb.record_failure();

        assert!(!cb.allow_request());
        assert!(!cb.allow_request());
        assert_eq!(cb.metrics().total_rejections, 2);
        assert_eq!(cb.metrics().total_opens, 1);
    }
}
