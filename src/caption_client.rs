use anyhow::{Context, Result};

/// Broadcast-overlay caption gateway. Failures here are cosmetic; callers log
/// and continue.
#[derive(Clone)]
pub struct CaptionClient {
    http: reqwest::Client,
    base_url: String,
}

impl CaptionClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn show(&self, task_id: &str, text: &str) -> Result<()> {
        // Captions are single-line on the overlay.
        let flattened = text.replace(['\n', '\r'], " ");
        self.post(task_id, &flattened).await
    }

    pub async fn clear(&self, task_id: &str) -> Result<()> {
        self.post(task_id, "").await
    }

    async fn post(&self, task_id: &str, text: &str) -> Result<()> {
        let url = format!("{}/v1/caption", self.base_url);
        let res = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "task_id": task_id,
                "text": text,
            }))
            .send()
            .await
            .context("caption request failed")?;
        if !res.status().is_success() {
            anyhow::bail!("caption gateway returned non-success status: {}", res.status());
        }
        Ok(())
    }
}
