//! Queued, not-yet-confirmed changes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::impl_status_conversions;
use crate::types::product::ProductPatch;

/// Lifecycle state of a queued mutation.
///
/// `Acknowledged` exists only transiently: acknowledged rows are deleted
/// from the durable store, so it is never observed in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    Pending,
    InFlight,
    Acknowledged,
    Conflicted,
    Failed,
}

impl_status_conversions!(MutationStatus {
    Pending => "pending",
    InFlight => "in_flight",
    Acknowledged => "acknowledged",
    Conflicted => "conflicted",
    Failed => "failed",
});

/// A durable record of a local write awaiting server confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: String,
    /// Client-generated, globally unique, stable across retries of the same
    /// logical operation. The server deduplicates on it.
    pub idempotency_key: String,
    pub entity_id: String,
    /// The version the patch was computed against.
    pub base_version: i64,
    pub patch: ProductPatch,
    /// Epoch seconds at enqueue time.
    pub created_at: i64,
    pub attempts: u32,
    pub status: MutationStatus,
    pub last_error: Option<String>,
}

impl PendingMutation {
    /// Create a fresh pending mutation with a new idempotency key.
    pub fn new(entity_id: impl Into<String>, base_version: i64, patch: ProductPatch) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            idempotency_key: Uuid::new_v4().to_string(),
            entity_id: entity_id.into(),
            base_version,
            patch,
            created_at: Utc::now().timestamp(),
            attempts: 0,
            status: MutationStatus::Pending,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::types::product::VariantStock;

    fn sample_patch() -> ProductPatch {
        ProductPatch {
            name: "Plain Tee".into(),
            price_cents: 1_999,
            quantity: 8,
            variants: vec![VariantStock { variant_code: "M".into(), quantity: 8 }],
        }
    }

    #[test]
    fn new_mutation_starts_pending_with_unique_keys() {
        let a = PendingMutation::new("prod-1", 3, sample_patch());
        let b = PendingMutation::new("prod-1", 3, sample_patch());

        assert_eq!(a.status, MutationStatus::Pending);
        assert_eq!(a.attempts, 0);
        assert_ne!(a.id, b.id);
        assert_ne!(a.idempotency_key, b.idempotency_key);
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            MutationStatus::Pending,
            MutationStatus::InFlight,
            MutationStatus::Acknowledged,
            MutationStatus::Conflicted,
            MutationStatus::Failed,
        ] {
            let text = status.to_string();
            assert_eq!(MutationStatus::from_str(&text).unwrap(), status);
        }
    }

    #[test]
    fn in_flight_uses_snake_case_storage_form() {
        assert_eq!(MutationStatus::InFlight.to_string(), "in_flight");
    }
}
