//! Reconciliation bookkeeping types.

use serde::{Deserialize, Serialize};

/// Counters emitted after each reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Mutations acknowledged by the server this pass.
    pub applied: u32,
    /// Mutations that hit a version conflict and now await resolution.
    pub conflicts: u32,
    /// Mutations that failed (transient requeues and permanent failures).
    pub failures: u32,
}

impl SyncSummary {
    /// True when the pass had nothing to report.
    pub fn is_empty(&self) -> bool {
        self.applied == 0 && self.conflicts == 0 && self.failures == 0
    }
}
