//! # Tillsync Domain
//!
//! Business domain types and models for Tillsync.
//!
//! This crate contains:
//! - Domain data types (Product, PendingMutation, StockLine, etc.)
//! - Domain error types and Result definitions
//! - Domain constants
//!
//! ## Architecture
//! - No dependencies on other Tillsync crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use errors::*;
pub use types::*;
