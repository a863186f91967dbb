//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::checkout::LineShortage;

/// Main error type for Tillsync
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum TillsyncError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Circuit breaker is open; backend calls are suppressed")]
    CircuitOpen,

    #[error("Version conflict on entity {entity_id}: submitted base {base_version}")]
    Conflict { entity_id: String, base_version: i64 },

    #[error("Insufficient stock for {} line(s)", .0.len())]
    InsufficientStock(Vec<LineShortage>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TillsyncError {
    /// True for failures worth retrying: the request may never have reached
    /// the server, or the server was temporarily unable to answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_) | Self::Database(_))
    }
}

/// Result type alias for Tillsync operations
pub type Result<T> = std::result::Result<T, TillsyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_covers_network_and_timeout() {
        assert!(TillsyncError::Network("connection refused".into()).is_transient());
        assert!(TillsyncError::Timeout(5_000).is_transient());
        assert!(!TillsyncError::Conflict { entity_id: "p1".into(), base_version: 3 }
            .is_transient());
        assert!(!TillsyncError::InvalidInput("quantity must be positive".into()).is_transient());
        assert!(!TillsyncError::CircuitOpen.is_transient());
    }

    #[test]
    fn insufficient_stock_reports_line_count() {
        let err = TillsyncError::InsufficientStock(vec![LineShortage {
            product_id: "p1".into(),
            variant_code: None,
            requested: 3,
            available: 1,
        }]);
        assert!(err.to_string().contains("1 line(s)"));
    }

    #[test]
    fn errors_round_trip_through_serde() {
        let err = TillsyncError::Conflict { entity_id: "p9".into(), base_version: 5 };
        let json = serde_json::to_string(&err).unwrap();
        let back: TillsyncError = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, TillsyncError::Conflict { base_version: 5, .. }));
    }
}
