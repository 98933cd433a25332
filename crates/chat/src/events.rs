//! Inbound webhook payload handling. Parsing is tolerant: the platform
//! batches heterogeneous entries (messages, delivery receipts, read marks)
//! and anything that is not a customer text message is skipped.

use serde_json::Value;

/// One customer text message lifted out of a webhook delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Platform delivery id, when present. Used for redelivery dedup.
    pub event_id: Option<String>,
    pub sender_id: String,
    /// Conversation key. The platform threads messages per sender, so the
    /// sender id doubles as the thread id.
    pub thread_id: String,
    pub text: String,
    pub timestamp_ms: Option<i64>,
}

/// Extracts customer text messages from a webhook body. Echoes of our own
/// outbound messages, attachments without text, and non-message entries
/// are all dropped.
pub fn parse_webhook_payload(payload: &Value) -> Vec<InboundMessage> {
    let mut messages = Vec::new();

    let Some(entries) = payload.get("entry").and_then(Value::as_array) else {
        return messages;
    };

    for entry in entries {
        let Some(messaging) = entry.get("messaging").and_then(Value::as_array) else {
            continue;
        };

        for event in messaging {
            let Some(sender_id) = event.pointer("/sender/id").and_then(Value::as_str) else {
                continue;
            };
            let Some(message) = event.get("message") else {
                continue;
            };
            if message.get("is_echo").and_then(Value::as_bool).unwrap_or(false) {
                continue;
            }
            let Some(text) = message.get("text").and_then(Value::as_str) else {
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }

            messages.push(InboundMessage {
                event_id: message.get("mid").and_then(Value::as_str).map(str::to_owned),
                sender_id: sender_id.to_owned(),
                thread_id: sender_id.to_owned(),
                text: text.to_owned(),
                timestamp_ms: event.get("timestamp").and_then(Value::as_i64),
            });
        }
    }

    messages
}

/// Webhook subscription handshake. Returns the challenge to echo back when
/// the mode and token match, `None` otherwise.
pub fn verify_subscription<'a>(
    mode: &str,
    token: &str,
    challenge: &'a str,
    expected_token: &str,
) -> Option<&'a str> {
    (mode == "subscribe" && !expected_token.is_empty() && token == expected_token)
        .then_some(challenge)
}
