//! # Tillsync Core
//!
//! Business logic for the offline-first point-of-sale sync client: the
//! optimistic concurrency controller, checkout stock deduction, and the
//! ports that storage and network adapters implement. No I/O lives here;
//! everything is expressed against the traits in [`ports`].

pub mod checkout;
pub mod events;
pub mod optimistic;
pub mod ports;

pub use checkout::CheckoutService;
pub use events::{EventBus, SyncEvent};
pub use optimistic::{OptimisticController, ReplayOutcome, UpdateOutcome};
pub use ports::{InventoryBackend, MutationQueue, ProductRepository, UpdateResult};

use tillsync_common::{FailureKind, RetryError};
use tillsync_domain::TillsyncError;

/// Breaker/retry classification for domain errors.
pub fn failure_kind(err: &TillsyncError) -> FailureKind {
    if err.is_transient() {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

/// Collapse a retry outcome back into a domain error.
pub fn flatten_retry(err: RetryError<TillsyncError>) -> TillsyncError {
    match err {
        RetryError::CircuitOpen => TillsyncError::CircuitOpen,
        RetryError::Permanent(source) | RetryError::Exhausted { source, .. } => source,
    }
}
