use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("send transport failure: {0}")]
    Transport(String),
    #[error("send rejected by platform (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Outbound reply channel. Send failures are surfaced, never swallowed;
/// the caller decides that a lost reply is tolerable.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, recipient_id: &str, text: &str) -> Result<(), SendError>;
}

pub struct HttpMessageSender {
    client: reqwest::Client,
    api_base_url: String,
    page_access_token: SecretString,
}

impl HttpMessageSender {
    pub fn new(api_base_url: impl Into<String>, page_access_token: SecretString) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, api_base_url: api_base_url.into(), page_access_token }
    }
}

#[async_trait]
impl MessageSender for HttpMessageSender {
    async fn send_text(&self, recipient_id: &str, text: &str) -> Result<(), SendError> {
        let url = format!("{}/me/messages", self.api_base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .query(&[("access_token", self.page_access_token.expose_secret())])
            .json(&json!({
                "recipient": {"id": recipient_id},
                "messaging_type": "RESPONSE",
                "message": {"text": text},
            }))
            .send()
            .await
            .map_err(|error| SendError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SendError::Rejected { status: status.as_u16(), message });
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct NoopMessageSender;

#[async_trait]
impl MessageSender for NoopMessageSender {
    async fn send_text(&self, _recipient_id: &str, _text: &str) -> Result<(), SendError> {
        Ok(())
    }
}

/// Test double recording every send, optionally failing on demand.
#[derive(Default)]
pub struct RecordingMessageSender {
    sent: Mutex<Vec<(String, String)>>,
    fail_all: Mutex<bool>,
}

impl RecordingMessageSender {
    pub fn fail_all(&self) {
        *self.fail_all.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MessageSender for RecordingMessageSender {
    async fn send_text(&self, recipient_id: &str, text: &str) -> Result<(), SendError> {
        if *self.fail_all.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(SendError::Transport("recording sender is set to fail".to_string()));
        }

        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.push((recipient_id.to_string(), text.to_string()));
        Ok(())
    }
}
