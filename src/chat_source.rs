use crate::comment_filter::CommentFilter;
use crate::events::{CommentRecord, Event, QueueSender};
use std::collections::HashSet;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Live-chat polling adapter. Polls the chat gateway on a fixed interval,
/// drops messages already seen (the gateway returns a sliding window), runs
/// the comment filter, and puts one `NewCommentReceived` per non-empty batch.
pub struct ChatSource {
    http: reqwest::Client,
    chat_url: String,
    poll_interval: Duration,
    filter: CommentFilter,
    queue: QueueSender,
}

impl ChatSource {
    pub fn new(
        chat_url: String,
        poll_interval: Duration,
        filter: CommentFilter,
        queue: QueueSender,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            chat_url,
            poll_interval,
            filter,
            queue,
        }
    }

    /// Runs the poll loop until aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(chat_url = %self.chat_url, "chat polling started");
            let mut seen: HashSet<String> = HashSet::new();
            let mut interval = tokio::time::interval(self.poll_interval);
            loop {
                interval.tick().await;
                match self.poll_once().await {
                    Ok(batch) => {
                        let fresh: Vec<CommentRecord> = batch
                            .into_iter()
                            .filter(|c| seen.insert(c.message_id.clone()))
                            .collect();
                        if fresh.is_empty() {
                            continue;
                        }
                        let passed = self.filter.filter_batch(fresh).await;
                        if passed.is_empty() {
                            continue;
                        }
                        debug!(count = passed.len(), "new comments received");
                        self.queue
                            .put_event(Event::NewCommentReceived { comments: passed });
                    }
                    Err(err) => {
                        warn!(error = %err, "chat poll failed");
                    }
                }
                // The seen set only ever grows; trim it once it is far past
                // anything the gateway's window could still return.
                if seen.len() > 10_000 {
                    seen.clear();
                }
            }
        })
    }

    async fn poll_once(&self) -> anyhow::Result<Vec<CommentRecord>> {
        let res = self.http.get(&self.chat_url).send().await?;
        if !res.status().is_success() {
            anyhow::bail!("chat gateway returned non-success status: {}", res.status());
        }
        Ok(res.json().await?)
    }
}
