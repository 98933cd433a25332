//! Turns a free-text customer message into a structured [`Extraction`].
//! Classification is infallible by design: any model or parse failure
//! degrades to [`Extraction::fallback`], which the readiness gate rejects.

use delguur_core::domain::conversation::{Sender, Turn};
use delguur_core::domain::product::Product;
use delguur_core::extraction::{ExtractedItem, Extraction};

use crate::llm::LlmClient;

/// At most this many of the latest turns are included in the prompt.
pub const HISTORY_WINDOW: usize = 5;

pub struct Classifier<C> {
    llm: C,
}

impl<C> Classifier<C>
where
    C: LlmClient,
{
    pub fn new(llm: C) -> Self {
        Self { llm }
    }

    pub async fn classify(
        &self,
        message: &str,
        history: &[Turn],
        catalog: &[Product],
    ) -> Extraction {
        let prompt = build_prompt(message, history, catalog);

        let raw = match self.llm.complete(&prompt).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(
                    event_name = "classifier.llm_failed",
                    error = %error,
                    "classification fell back to the deterministic result"
                );
                return Extraction::fallback();
            }
        };

        match parse_extraction(&raw) {
            Some(extraction) => extraction,
            None => {
                tracing::warn!(
                    event_name = "classifier.parse_failed",
                    raw_len = raw.len(),
                    "model reply was not valid extraction JSON"
                );
                Extraction::fallback()
            }
        }
    }
}

pub fn build_prompt(message: &str, history: &[Turn], catalog: &[Product]) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are an order-intake assistant for a Mongolian online shop. Customers write in \
         Mongolian, often transliterated in Latin letters. Read the conversation and the \
         latest message, then answer with ONLY a JSON object, no prose, matching:\n\
         {\"intent\": \"ordering|inquiry|complaint|browsing|other\",\n \
          \"data\": {\"items\": [{\"name\": string, \"quantity\": number|null, \"price\": number|null, \"attributes\": object|null}],\n \
                     \"phone\": string|null, \"full_address\": string|null, \"payment_method\": string|null},\n \
          \"isOrderReady\": bool, \"confidence\": number 0..1, \"missingFields\": [string]}\n\
         Set isOrderReady only when items, a phone number and a delivery address are all \
         present. List absent ones in missingFields (\"items\", \"phone\", \"address\").\n\n",
    );

    prompt.push_str("Catalog (name | price | in stock):\n");
    for product in catalog {
        prompt.push_str(&format!(
            "- {} | {} | {}\n",
            product.name,
            product.price,
            if product.in_stock() { "yes" } else { "no" }
        ));
    }

    let start = history.len().saturating_sub(HISTORY_WINDOW);
    if start < history.len() {
        prompt.push_str("\nConversation so far:\n");
        for turn in &history[start..] {
            let speaker = match turn.sender {
                Sender::Customer => "customer",
                Sender::Bot => "bot",
            };
            prompt.push_str(&format!("{speaker}: {}\n", turn.text));
        }
    }

    prompt.push_str("\nLatest message:\n");
    prompt.push_str(message);
    prompt
}

/// Lenient parse of a model reply. Tolerates code fences and surrounding
/// prose by slicing from the first `{` to the last `}`, drops items that
/// do not decode instead of failing the whole reply, and clamps
/// `confidence` into `[0, 1]`.
pub fn parse_extraction(raw: &str) -> Option<Extraction> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }

    let mut value: serde_json::Value = serde_json::from_str(&raw[start..=end]).ok()?;
    if let Some(items) = value.pointer_mut("/data/items").and_then(|items| items.as_array_mut()) {
        items.retain(|item| serde_json::from_value::<ExtractedItem>(item.clone()).is_ok());
    }

    let mut extraction: Extraction = serde_json::from_value(value).ok()?;
    extraction.confidence = extraction.confidence.clamp(0.0, 1.0);
    Some(extraction)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use delguur_core::domain::conversation::{Intent, Sender, Turn};
    use delguur_core::domain::product::{Product, ProductId};
    use delguur_core::extraction::Extraction;

    use crate::llm::ScriptedLlmClient;

    use super::{build_prompt, parse_extraction, Classifier, HISTORY_WINDOW};

    fn catalog() -> Vec<Product> {
        vec![Product {
            id: ProductId("tshirt-black".to_string()),
            name: "хар цамц".to_string(),
            price: Decimal::new(15_000, 0),
            stock: 20,
            active: true,
        }]
    }

    fn turn(sender: Sender, text: &str) -> Turn {
        Turn { sender, text: text.to_string(), at: Utc::now() }
    }

    const READY_REPLY: &str = r#"{
        "intent": "ordering",
        "data": {
            "items": [{"name": "хар цамц", "quantity": 2, "price": 15000}],
            "phone": "99112233",
            "full_address": "БЗД 14-р хороо"
        },
        "isOrderReady": true,
        "confidence": 0.92,
        "missingFields": []
    }"#;

    #[tokio::test]
    async fn well_formed_reply_is_decoded() {
        let classifier = Classifier::new(ScriptedLlmClient::with_replies([READY_REPLY]));

        let extraction = classifier
            .classify("2 ширхэг хар цамц авъя. Утас: 99112233. БЗД 14-р хороо", &[], &catalog())
            .await;

        assert_eq!(extraction.intent, Intent::Ordering);
        assert!(extraction.is_order_ready);
        assert_eq!(extraction.data.items[0].quantity, Some(2));
    }

    #[tokio::test]
    async fn fenced_reply_with_prose_is_still_decoded() {
        let fenced = format!("Here is the result:\n```json\n{READY_REPLY}\n```\nDone.");
        let classifier = Classifier::new(ScriptedLlmClient::with_replies([fenced]));

        let extraction = classifier.classify("захиалга", &[], &catalog()).await;
        assert!(extraction.is_order_ready);
    }

    #[tokio::test]
    async fn garbage_reply_falls_back() {
        let classifier =
            Classifier::new(ScriptedLlmClient::with_replies(["Sorry, I cannot do that."]));

        let extraction = classifier.classify("юу байна", &[], &catalog()).await;
        assert_eq!(extraction, Extraction::fallback());
    }

    #[tokio::test]
    async fn llm_failure_falls_back() {
        let client = ScriptedLlmClient::default();
        client.push_failure("timeout");
        let classifier = Classifier::new(client);

        let extraction = classifier.classify("2 цамц авъя", &[], &catalog()).await;
        assert_eq!(extraction, Extraction::fallback());
    }

    #[test]
    fn prompt_includes_only_the_latest_history_window() {
        let history: Vec<Turn> =
            (0..8).map(|i| turn(Sender::Customer, &format!("msg {i}"))).collect();

        let prompt = build_prompt("сүүлийн мессеж", &history, &catalog());

        assert!(!prompt.contains("msg 2"));
        for index in 3..8 {
            assert!(prompt.contains(&format!("msg {index}")), "msg {index} should be present");
        }
        assert_eq!(HISTORY_WINDOW, 5);
    }

    #[test]
    fn prompt_lists_catalog_with_prices() {
        let prompt = build_prompt("юу зарж байна", &[], &catalog());
        assert!(prompt.contains("хар цамц | 15000 | yes"));
    }

    #[test]
    fn parse_rejects_text_without_braces() {
        assert!(parse_extraction("no json here").is_none());
        assert!(parse_extraction("}{").is_none());
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let high = parse_extraction(r#"{"intent": "ordering", "confidence": 3.5}"#)
            .expect("parses");
        assert_eq!(high.confidence, 1.0);

        let low = parse_extraction(r#"{"intent": "ordering", "confidence": -0.25}"#)
            .expect("parses");
        assert_eq!(low.confidence, 0.0);
    }

    #[test]
    fn undecodable_item_is_dropped_without_losing_the_reply() {
        let raw = r#"{
            "intent": "ordering",
            "data": {
                "items": [{"name": "хар цамц", "quantity": 2}, {"name": 42}],
                "phone": "99112233",
                "full_address": "БЗД 14-р хороо"
            },
            "isOrderReady": true,
            "confidence": 0.9,
            "missingFields": []
        }"#;

        let extraction = parse_extraction(raw).expect("parses");
        assert_eq!(extraction.data.items.len(), 1);
        assert_eq!(extraction.data.items[0].name, "хар цамц");
        assert!(extraction.is_order_ready);
    }
}
