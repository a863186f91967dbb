//! Domain-wide default values.
//!
//! These are the defaults baked into config structs; deployments override
//! them through `TILLSYNC_*` environment variables or the config file.

use std::time::Duration;

/// Consecutive failures before the circuit breaker opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Cooldown before an open breaker admits a half-open probe.
pub const DEFAULT_BREAKER_COOLDOWN: Duration = Duration::from_millis(30_000);

/// Total attempts (initial try + retries) for a transient failure.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential retry backoff.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Upper bound for a single retry backoff delay.
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Interval between scheduled reconciliation passes.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Transient failures tolerated per queued mutation before it is marked
/// permanently failed.
pub const DEFAULT_MUTATION_MAX_ATTEMPTS: u32 = 3;

/// Pending-mutation count beyond which the queue reports saturation.
pub const DEFAULT_QUEUE_SOFT_CAPACITY: usize = 1_000;

/// Entities drained concurrently during one reconciliation pass.
pub const DEFAULT_DRAIN_FAN_OUT: usize = 4;
