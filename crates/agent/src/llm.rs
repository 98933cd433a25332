use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{json, Value};

use delguur_core::config::{LlmConfig, LlmProvider};

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
impl<T> LlmClient for std::sync::Arc<T>
where
    T: LlmClient + ?Sized,
{
    async fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt).await
    }
}

pub struct HttpLlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpLlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("building llm http client")?;
        Ok(Self { client, config })
    }

    async fn complete_once(&self, prompt: &str) -> Result<String> {
        match self.config.provider {
            LlmProvider::Ollama => self.complete_ollama(prompt).await,
            LlmProvider::OpenAi => self.complete_openai(prompt).await,
            LlmProvider::Anthropic => self.complete_anthropic(prompt).await,
        }
    }

    async fn complete_ollama(&self, prompt: &str) -> Result<String> {
        let base = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| anyhow!("llm.base_url is not configured"))?;

        let response: Value = self
            .client
            .post(format!("{}/api/generate", base.trim_end_matches('/')))
            .json(&json!({
                "model": self.config.model,
                "prompt": prompt,
                "stream": false,
            }))
            .send()
            .await
            .context("sending ollama request")?
            .error_for_status()
            .context("ollama returned an error status")?
            .json()
            .await
            .context("decoding ollama response")?;

        response["response"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("ollama response is missing the `response` field"))
    }

    async fn complete_openai(&self, prompt: &str) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow!("llm.api_key is not configured"))?;
        let base = self.config.base_url.as_deref().unwrap_or("https://api.openai.com/v1");

        let response: Value = self
            .client
            .post(format!("{}/chat/completions", base.trim_end_matches('/')))
            .bearer_auth(api_key.expose_secret())
            .json(&json!({
                "model": self.config.model,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await
            .context("sending openai request")?
            .error_for_status()
            .context("openai returned an error status")?
            .json()
            .await
            .context("decoding openai response")?;

        response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("openai response has no message content"))
    }

    async fn complete_anthropic(&self, prompt: &str) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow!("llm.api_key is not configured"))?;
        let base = self.config.base_url.as_deref().unwrap_or("https://api.anthropic.com/v1");

        let response: Value = self
            .client
            .post(format!("{}/messages", base.trim_end_matches('/')))
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": self.config.model,
                "max_tokens": 1024,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await
            .context("sending anthropic request")?
            .error_for_status()
            .context("anthropic returned an error status")?
            .json()
            .await
            .context("decoding anthropic response")?;

        response["content"][0]["text"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("anthropic response has no text content"))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = anyhow!("llm request was never attempted");

        for attempt in 1..=attempts {
            match self.complete_once(prompt).await {
                Ok(text) => return Ok(text),
                Err(error) => {
                    tracing::warn!(
                        event_name = "llm.request_failed",
                        attempt,
                        attempts,
                        error = %error,
                        "llm completion attempt failed"
                    );
                    last_error = error;
                }
            }
        }

        Err(last_error)
    }
}

enum ScriptedResponse {
    Reply(String),
    Failure(String),
}

/// Test double that replays a fixed script of completions.
#[derive(Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<ScriptedResponse>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::default();
        {
            let mut script = client.script.lock().unwrap_or_else(|e| e.into_inner());
            script.extend(replies.into_iter().map(|reply| ScriptedResponse::Reply(reply.into())));
        }
        client
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.push_back(ScriptedResponse::Reply(reply.into()));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.push_back(ScriptedResponse::Failure(message.into()));
    }

    /// Prompts the client has been asked to complete, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        {
            let mut prompts = self.prompts.lock().unwrap_or_else(|e| e.into_inner());
            prompts.push(prompt.to_string());
        }

        let next = {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            script.pop_front()
        };

        match next {
            Some(ScriptedResponse::Reply(reply)) => Ok(reply),
            Some(ScriptedResponse::Failure(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted llm client has no responses left")),
        }
    }
}
