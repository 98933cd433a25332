//! The readiness gate and order assembly. The gate is the only place that
//! decides whether a classified turn becomes an order; everything downstream
//! trusts its decision.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::conversation::{Conversation, Intent};
use crate::domain::order::{Order, OrderId, OrderLine, OrderStatus, Provenance};
use crate::domain::product::Product;
use crate::extraction::Extraction;
use crate::flows::IntakeEvent;
use crate::phone::{address_or_unknown, phone_or_unknown, ADDRESS_UNKNOWN, PHONE_UNKNOWN};

/// A turn only creates an order when the classifier's confidence strictly
/// exceeds this value. Exactly 0.6 does not pass.
pub const CONFIDENCE_THRESHOLD: f64 = 0.6;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadinessDecision {
    Ready,
    Incomplete { missing_fields: Vec<String> },
    NonOrdering,
}

impl ReadinessDecision {
    pub fn event(&self) -> IntakeEvent {
        match self {
            Self::Ready => IntakeEvent::OrderReady,
            Self::Incomplete { .. } => IntakeEvent::OrderingIncomplete,
            Self::NonOrdering => IntakeEvent::NonOrdering,
        }
    }
}

/// All three conditions must hold for an order: ordering intent, the
/// classifier's own ready flag, and confidence strictly above the
/// threshold. A "ready" extraction with no items is demoted to incomplete
/// rather than producing an empty order.
pub fn evaluate_readiness(extraction: &Extraction) -> ReadinessDecision {
    if extraction.intent != Intent::Ordering {
        return ReadinessDecision::NonOrdering;
    }

    if !extraction.is_order_ready || extraction.confidence <= CONFIDENCE_THRESHOLD {
        return ReadinessDecision::Incomplete { missing_fields: extraction.missing_fields.clone() };
    }

    if extraction.data.items.is_empty() {
        return ReadinessDecision::Incomplete { missing_fields: vec!["items".to_string()] };
    }

    ReadinessDecision::Ready
}

fn lookup_price(catalog: &[Product], name: &str) -> Option<Decimal> {
    let wanted = name.trim().to_lowercase();
    catalog
        .iter()
        .find(|product| product.name.to_lowercase() == wanted)
        .map(|product| product.price)
}

/// Builds the order row for a `Ready` decision. Missing quantities default
/// to one. Prices come from the extraction when the model read one off the
/// catalog, then from a catalog name lookup; a line with neither gets a
/// zero price and flags the order for review, as does a sentinel contact
/// field.
pub fn assemble_order(
    conversation: &Conversation,
    extraction: &Extraction,
    catalog: &[Product],
    message_text: &str,
) -> Order {
    let mut needs_review = false;

    let lines: Vec<OrderLine> = extraction
        .data
        .items
        .iter()
        .map(|item| {
            let unit_price = match item.price.or_else(|| lookup_price(catalog, &item.name)) {
                Some(price) => price,
                None => {
                    needs_review = true;
                    Decimal::ZERO
                }
            };
            OrderLine {
                product_name: item.name.clone(),
                quantity: item.quantity.unwrap_or(1),
                unit_price,
            }
        })
        .collect();

    let phone = phone_or_unknown(extraction.data.phone.as_deref());
    let address = address_or_unknown(extraction.data.full_address.as_deref());
    if phone == PHONE_UNKNOWN || address == ADDRESS_UNKNOWN {
        needs_review = true;
    }

    let total = Order::compute_total(&lines);

    Order {
        id: OrderId(Uuid::new_v4()),
        conversation_id: conversation.id.clone(),
        customer_id: conversation.customer_id.clone(),
        phone,
        address,
        lines,
        total,
        needs_review,
        status: OrderStatus::Pending,
        provenance: Provenance {
            message_text: message_text.to_string(),
            raw_extraction: serde_json::to_value(extraction).unwrap_or(serde_json::Value::Null),
            confidence: extraction.confidence,
        },
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use crate::domain::conversation::{Conversation, Intent};
    use crate::domain::customer::CustomerId;
    use crate::domain::product::{Product, ProductId};
    use crate::extraction::{ExtractedData, ExtractedItem, Extraction};
    use crate::phone::{ADDRESS_UNKNOWN, PHONE_UNKNOWN};

    use super::{assemble_order, evaluate_readiness, ReadinessDecision};

    fn catalog() -> Vec<Product> {
        vec![
            Product {
                id: ProductId("tshirt-black".to_string()),
                name: "хар цамц".to_string(),
                price: Decimal::new(15_000, 0),
                stock: 20,
                active: true,
            },
            Product {
                id: ProductId("cap".to_string()),
                name: "малгай".to_string(),
                price: Decimal::new(8_000, 0),
                stock: 5,
                active: true,
            },
        ]
    }

    fn ordering_extraction(confidence: f64, ready: bool) -> Extraction {
        Extraction {
            intent: Intent::Ordering,
            data: ExtractedData {
                items: vec![ExtractedItem {
                    name: "хар цамц".to_string(),
                    quantity: Some(2),
                    price: None,
                    attributes: None,
                }],
                phone: Some("99112233".to_string()),
                full_address: Some("БЗД 14-р хороо".to_string()),
                payment_method: None,
            },
            is_order_ready: ready,
            confidence,
            missing_fields: Vec::new(),
        }
    }

    #[test]
    fn ready_needs_all_three_conditions() {
        assert_eq!(evaluate_readiness(&ordering_extraction(0.92, true)), ReadinessDecision::Ready);

        let not_ready = ordering_extraction(0.92, false);
        assert!(matches!(
            evaluate_readiness(&not_ready),
            ReadinessDecision::Incomplete { .. }
        ));

        let mut non_ordering = ordering_extraction(0.92, true);
        non_ordering.intent = Intent::Inquiry;
        assert_eq!(evaluate_readiness(&non_ordering), ReadinessDecision::NonOrdering);
    }

    #[test]
    fn confidence_exactly_at_threshold_does_not_pass() {
        let borderline = ordering_extraction(0.6, true);
        assert!(matches!(
            evaluate_readiness(&borderline),
            ReadinessDecision::Incomplete { .. }
        ));

        let above = ordering_extraction(0.601, true);
        assert_eq!(evaluate_readiness(&above), ReadinessDecision::Ready);
    }

    #[test]
    fn ready_flag_with_no_items_is_demoted_to_incomplete() {
        let mut empty = ordering_extraction(0.9, true);
        empty.data.items.clear();

        assert_eq!(
            evaluate_readiness(&empty),
            ReadinessDecision::Incomplete { missing_fields: vec!["items".to_string()] }
        );
    }

    #[test]
    fn fallback_extraction_never_passes() {
        assert_eq!(evaluate_readiness(&Extraction::fallback()), ReadinessDecision::NonOrdering);
    }

    #[test]
    fn assembles_priced_order_from_catalog() {
        let conversation = Conversation::new("t-1", CustomerId(Uuid::new_v4()));
        let extraction = ordering_extraction(0.92, true);

        let order = assemble_order(
            &conversation,
            &extraction,
            &catalog(),
            "2 ширхэг хар цамц авъя. Утас: 99112233. БЗД 14-р хороо",
        );

        assert_eq!(order.total, Decimal::new(30_000, 0));
        assert_eq!(order.phone, "99112233");
        assert_eq!(order.address, "БЗД 14-р хороо");
        assert!(!order.needs_review);
        assert_eq!(order.provenance.confidence, 0.92);
    }

    #[test]
    fn extracted_price_takes_precedence_over_catalog() {
        let conversation = Conversation::new("t-5", CustomerId(Uuid::new_v4()));
        let mut extraction = ordering_extraction(0.9, true);
        extraction.data.items[0].price = Some(Decimal::new(14_000, 0));

        let order = assemble_order(&conversation, &extraction, &catalog(), "захиалга");

        assert_eq!(order.lines[0].unit_price, Decimal::new(14_000, 0));
        assert_eq!(order.total, Decimal::new(28_000, 0));
        assert!(!order.needs_review);
    }

    #[test]
    fn unknown_product_prices_at_zero_and_flags_review() {
        let conversation = Conversation::new("t-2", CustomerId(Uuid::new_v4()));
        let mut extraction = ordering_extraction(0.9, true);
        extraction.data.items.push(ExtractedItem {
            name: "улаан пиджак".to_string(),
            quantity: None,
            price: None,
            attributes: None,
        });

        let order = assemble_order(&conversation, &extraction, &catalog(), "захиалга");

        assert!(order.needs_review);
        assert_eq!(order.lines[1].quantity, 1);
        assert_eq!(order.lines[1].unit_price, Decimal::ZERO);
        assert_eq!(order.total, Decimal::new(30_000, 0));
    }

    #[test]
    fn sentinel_contact_fields_flag_review() {
        let conversation = Conversation::new("t-3", CustomerId(Uuid::new_v4()));
        let mut extraction = ordering_extraction(0.9, true);
        extraction.data.phone = None;
        extraction.data.full_address = Some("   ".to_string());

        let order = assemble_order(&conversation, &extraction, &catalog(), "захиалга");

        assert_eq!(order.phone, PHONE_UNKNOWN);
        assert_eq!(order.address, ADDRESS_UNKNOWN);
        assert!(order.needs_review);
    }

    #[test]
    fn invalid_phone_becomes_sentinel_not_raw_text() {
        let conversation = Conversation::new("t-4", CustomerId(Uuid::new_v4()));
        let mut extraction = ordering_extraction(0.9, true);
        extraction.data.phone = Some("12345".to_string());

        let order = assemble_order(&conversation, &extraction, &catalog(), "захиалга");

        assert_eq!(order.phone, PHONE_UNKNOWN);
        assert!(order.needs_review);
    }
}
