//! Checkout and atomic stock deduction types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, TillsyncError};

/// An immutable line item submitted for deduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    #[serde(rename = "productId")]
    pub product_id: String,
    #[serde(rename = "variantCode", skip_serializing_if = "Option::is_none")]
    pub variant_code: Option<String>,
    pub quantity: i64,
}

/// A multi-line deduction the server applies as one unit or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductionRequest {
    #[serde(rename = "locationId")]
    pub location_id: String,
    pub items: Vec<StockLine>,
    #[serde(skip)]
    pub idempotency_key: String,
}

impl DeductionRequest {
    /// Build a deduction request, validating that it is non-empty and every
    /// line has a positive quantity.
    pub fn new(location_id: impl Into<String>, items: Vec<StockLine>) -> Result<Self> {
        if items.is_empty() {
            return Err(TillsyncError::InvalidInput(
                "deduction request must contain at least one line".into(),
            ));
        }
        if let Some(line) = items.iter().find(|line| line.quantity <= 0) {
            return Err(TillsyncError::InvalidInput(format!(
                "line for product {} has non-positive quantity {}",
                line.product_id, line.quantity
            )));
        }

        Ok(Self {
            location_id: location_id.into(),
            items,
            idempotency_key: Uuid::new_v4().to_string(),
        })
    }
}

/// Identifies a line the server could not satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineShortage {
    #[serde(rename = "productId")]
    pub product_id: String,
    #[serde(rename = "variantCode", default)]
    pub variant_code: Option<String>,
    pub requested: i64,
    pub available: i64,
}

/// A sale submitted at checkout after stock has been deducted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleDraft {
    #[serde(rename = "locationId")]
    pub location_id: String,
    pub lines: Vec<StockLine>,
    #[serde(rename = "totalCents")]
    pub total_cents: i64,
}

/// Server acknowledgement of a recorded sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleReceipt {
    #[serde(rename = "saleId")]
    pub sale_id: String,
    #[serde(rename = "recordedAt")]
    pub recorded_at: i64,
    /// False when the idempotency key matched an earlier submission and the
    /// original result was returned.
    #[serde(default = "default_true")]
    pub created: bool,
}

fn default_true() -> bool {
    true
}
