//! Versioned inventory records.
//!
//! The server is the sole owner of `version`: it increments by exactly one
//! per accepted write, and the client never bumps it locally. A locally
//! mutated product therefore carries a *tentative* state against the last
//! version the client saw.

use serde::{Deserialize, Serialize};

/// Per-variant stock breakdown (e.g. size or colour of the same SKU).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantStock {
    #[serde(rename = "variantCode")]
    pub variant_code: String,
    pub quantity: i64,
}

/// A stock-keeping unit as known to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Opaque server-assigned identifier, immutable.
    pub id: String,
    pub sku: String,
    pub name: String,
    /// Optimistic concurrency token, server-assigned.
    pub version: i64,
    #[serde(rename = "priceCents")]
    pub price_cents: i64,
    /// Total on-hand quantity across variants.
    pub quantity: i64,
    #[serde(default)]
    pub variants: Vec<VariantStock>,
    #[serde(rename = "locationId")]
    pub location_id: String,
    /// Epoch seconds of the last server-acknowledged write.
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

/// The mutable fields of a product, submitted as the full resulting state of
/// an optimistic update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPatch {
    pub name: String,
    #[serde(rename = "priceCents")]
    pub price_cents: i64,
    pub quantity: i64,
    #[serde(default)]
    pub variants: Vec<VariantStock>,
}

impl Product {
    /// Extract the mutable fields as a patch payload.
    pub fn to_patch(&self) -> ProductPatch {
        ProductPatch {
            name: self.name.clone(),
            price_cents: self.price_cents,
            quantity: self.quantity,
            variants: self.variants.clone(),
        }
    }

    /// Apply a patch to produce the tentative local state. The version is
    /// left untouched; only the server may increment it.
    pub fn with_patch(&self, patch: &ProductPatch) -> Self {
        Self {
            name: patch.name.clone(),
            price_cents: patch.price_cents,
            quantity: patch.quantity,
            variants: patch.variants.clone(),
            ..self.clone()
        }
    }
}
