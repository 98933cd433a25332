//! Wire contract between the language-model classifier and the intake
//! pipeline. The serde shapes are deliberately lenient: every field has a
//! default so a partially well-formed model reply still decodes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::conversation::Intent;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedItem {
    pub name: String,
    pub quantity: Option<u32>,
    /// Unit price as the model read it from the catalog, when it gave one.
    pub price: Option<Decimal>,
    /// Free-form variant details (size, colour) as the model reported them.
    /// Carried through to provenance, not interpreted by the gate.
    pub attributes: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedData {
    pub items: Vec<ExtractedItem>,
    pub phone: Option<String>,
    pub full_address: Option<String>,
    pub payment_method: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Extraction {
    pub intent: Intent,
    pub data: ExtractedData,
    pub is_order_ready: bool,
    pub confidence: f64,
    pub missing_fields: Vec<String>,
}

impl Default for Extraction {
    fn default() -> Self {
        Self::fallback()
    }
}

impl Extraction {
    /// Deterministic result used whenever the classifier cannot produce a
    /// usable one. It can never pass the readiness gate.
    pub fn fallback() -> Self {
        Self {
            intent: Intent::Other,
            data: ExtractedData::default(),
            is_order_ready: false,
            confidence: 0.0,
            missing_fields: vec!["items".to_string()],
        }
    }
}
