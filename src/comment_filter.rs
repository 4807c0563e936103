use crate::events::CommentRecord;
use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub ng_words: Vec<String>,
    #[serde(default)]
    pub ng_users: Vec<String>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

impl FilterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read comment filter config: {}", path.display()))?;
        serde_json::from_str(&s).context("parse comment filter config")
    }
}

/// NG-word / NG-user filter applied to comment batches with bounded
/// concurrency and an overall deadline, so one slow check can never stall the
/// comment-response pipeline. Partial results are used on timeout.
#[derive(Clone)]
pub struct CommentFilter {
    config: Arc<FilterConfig>,
    max_concurrency: usize,
    timeout: Duration,
}

impl CommentFilter {
    pub fn new(config: FilterConfig, max_concurrency: usize, timeout: Duration) -> Self {
        Self {
            config: Arc::new(config),
            max_concurrency,
            timeout,
        }
    }

    pub async fn filter_batch(&self, comments: Vec<CommentRecord>) -> Vec<CommentRecord> {
        let total = comments.len();
        let deadline = tokio::time::Instant::now() + self.timeout;
        let checks = stream::iter(comments.into_iter().map(|comment| {
            let filter = self.clone();
            async move { filter.check_one(comment).await }
        }))
        .buffered(self.max_concurrency.max(1));
        tokio::pin!(checks);

        let mut passed = Vec::new();
        loop {
            tokio::select! {
                next = checks.next() => match next {
                    Some(Some(comment)) => passed.push(comment),
                    Some(None) => {}
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(checked = passed.len(), total, "comment filtering timed out, using partial results");
                    break;
                }
            }
        }
        debug!(passed = passed.len(), total, "comment batch filtered");
        passed
    }

    async fn check_one(&self, mut comment: CommentRecord) -> Option<CommentRecord> {
        if self
            .config
            .ng_users
            .iter()
            .any(|user| user == &comment.username || user == &comment.user_id)
        {
            debug!(username = %comment.username, "comment dropped: blocked user");
            return None;
        }
        if let Some(max) = self.config.max_length {
            if comment.message.chars().count() > max {
                debug!(username = %comment.username, "comment dropped: too long");
                return None;
            }
        }
        for word in &self.config.ng_words {
            if comment.message.contains(word.as_str()) {
                debug!(username = %comment.username, "comment dropped: ng word");
                return None;
            }
        }
        comment.message = comment.message.trim().to_string();
        if comment.message.is_empty() {
            return None;
        }
        Some(comment)
    }
}
