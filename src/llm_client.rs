use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;

/// OpenAI-style chat completion adapter. Each handler owns its own instance;
/// the underlying reqwest client is cheap to clone.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    system_prompt: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl LlmClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            system_prompt: system_prompt.into(),
        }
    }

    /// One string in, one string out. Transient failures (429, 5xx, transport)
    /// are retried with exponential backoff up to a bounded attempt count;
    /// exhausted retries surface as an error for the caller's fallback.
    pub async fn chat(&self, user_prompt: &str) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = Duration::from_millis(BACKOFF_BASE_MS << (attempt - 1));
                tokio::time::sleep(backoff).await;
            }
            match self.chat_once(user_prompt).await {
                Ok(text) => return Ok(text),
                Err(err) if err.retryable => {
                    warn!(attempt, error = %err.inner, "llm call failed, retrying");
                    last_err = Some(err.inner);
                }
                Err(err) => return Err(err.inner),
            }
        }
        Err(last_err.context("llm retries exhausted")?)
    }

    async fn chat_once(&self, user_prompt: &str) -> std::result::Result<String, ChatError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": self.system_prompt },
                    { "role": "user", "content": user_prompt },
                ],
            }))
            .send()
            .await
            .map_err(|err| ChatError {
                inner: anyhow::Error::new(err).context("llm request failed"),
                retryable: true,
            })?;

        let status = res.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ChatError {
                inner: anyhow::anyhow!("llm returned transient status: {status}"),
                retryable: true,
            });
        }
        if !status.is_success() {
            return Err(ChatError {
                inner: anyhow::anyhow!("llm returned non-success status: {status}"),
                retryable: false,
            });
        }

        let body: ChatResponse = res.json().await.map_err(|err| ChatError {
            inner: anyhow::Error::new(err).context("llm decode failed"),
            retryable: false,
        })?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(content)
    }
}

struct ChatError {
    inner: anyhow::Error,
    retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_endpoint_errors_after_retries() {
        let llm = LlmClient::new("http://127.0.0.1:9", "test-model", "key", "persona");
        let res = llm.chat("hello").await;
        assert!(res.is_err());
    }
}
