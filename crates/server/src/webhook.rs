//! Webhook boundary. The subscription handshake is the only request that
//! can fail; message deliveries are always acknowledged with 200 so the
//! platform never retries a turn we already own.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::Value;

use delguur_chat::{parse_webhook_payload, verify_subscription};

use crate::intake::IntakePipeline;

#[derive(Clone)]
pub struct WebhookState {
    pub pipeline: Arc<IntakePipeline>,
    pub verify_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhook", get(verify).post(receive)).with_state(state)
}

async fn verify(
    State(state): State<WebhookState>,
    Query(params): Query<VerifyParams>,
) -> (StatusCode, String) {
    let mode = params.mode.as_deref().unwrap_or_default();
    let token = params.verify_token.as_deref().unwrap_or_default();
    let challenge = params.challenge.as_deref().unwrap_or_default();

    match verify_subscription(mode, token, challenge, &state.verify_token) {
        Some(challenge) => (StatusCode::OK, challenge.to_string()),
        None => {
            tracing::warn!(event_name = "webhook.verification_failed", mode, "handshake refused");
            (StatusCode::FORBIDDEN, "verification failed".to_string())
        }
    }
}

// Body is taken as a raw string so a malformed delivery still gets its 200.
async fn receive(State(state): State<WebhookState>, body: String) -> &'static str {
    let payload: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let messages = parse_webhook_payload(&payload);

    tracing::info!(
        event_name = "webhook.delivery_received",
        message_count = messages.len(),
        "webhook delivery parsed"
    );

    for message in &messages {
        state.pipeline.process_event(message).await;
    }

    "EVENT_RECEIVED"
}
