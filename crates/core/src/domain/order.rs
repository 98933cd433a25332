use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;
use crate::domain::customer::CustomerId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub Uuid);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Fulfilled,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl OrderLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// What the classifier saw when this order was accepted. Kept verbatim so a
/// flagged order can be reviewed against the message that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub message_text: String,
    pub raw_extraction: serde_json::Value,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub conversation_id: ConversationId,
    pub customer_id: CustomerId,
    /// Canonical 8-digit phone, or the unknown sentinel.
    pub phone: String,
    /// Canonicalized delivery address, or the unknown sentinel.
    pub address: String,
    pub lines: Vec<OrderLine>,
    pub total: Decimal,
    /// Set when any line price was unresolved or a contact field is a
    /// sentinel; such orders need a human look before fulfilment.
    pub needs_review: bool,
    pub status: OrderStatus,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn compute_total(lines: &[OrderLine]) -> Decimal {
        lines.iter().map(OrderLine::line_total).sum()
    }
}
