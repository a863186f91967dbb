//! Background synchronization.

pub mod reconciler;

pub use reconciler::{Reconciler, ReconcilerConfig};
