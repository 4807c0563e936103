use crate::events::{CommentRecord, Event, QueueSender};
use crate::llm_client::LlmClient;
use crate::mode::{ConversationMode, ModeManager};
use crate::prompts::PromptLibrary;
use crate::text::split_into_sentences;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

/// Spoken in place of a failed generation so the pipeline never goes silent.
const FALLBACK_SENTENCES: &[&str] = &[
    "うーん、ちょっと考えがまとまらないみたいです。",
    "少し整理する時間をください。",
];

const FALLBACK_GREETING: &[&str] = &["みなさん、こんにちは。今日もよろしくお願いします。"];

const FALLBACK_FAREWELL: &[&str] = &[
    "今日はここまでにしますね。",
    "見てくれてありがとうございました。またね。",
];

fn fallback(sentences: &[&str]) -> Vec<String> {
    sentences.iter().map(|s| s.to_string()).collect()
}

fn summarize_comments(comments: &[CommentRecord]) -> String {
    comments
        .iter()
        .map(|c| format!("{}: {}", c.username, c.message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Generation runs on a spawned worker whose only side effect is putting
/// exactly one `*Ready` event back on the queue, on success and on fallback
/// alike. All mode-manager access happens synchronously on the dispatcher
/// task before the spawn.
pub struct MonologueHandler {
    llm: LlmClient,
    prompts: Arc<PromptLibrary>,
    queue: QueueSender,
}

impl MonologueHandler {
    pub fn new(llm: LlmClient, prompts: Arc<PromptLibrary>, queue: QueueSender) -> Self {
        Self { llm, prompts, queue }
    }

    pub fn handle(
        &self,
        task_id: String,
        theme_file: Option<PathBuf>,
        theme_content: Option<String>,
        modes: &mut ModeManager,
    ) {
        if let Some(path) = theme_file {
            modes.set_theme_file(path);
        }
        if let Some(content) = theme_content {
            modes.start_themed_monologue(content);
        } else if modes.should_switch_mode(false) {
            modes.switch_mode(None, false);
        }
        modes.increment_duration();

        let template = if modes.current_mode() == ConversationMode::ThemedMonologue {
            "themed_monologue"
        } else {
            "normal_monologue"
        };
        let vars = modes.prompt_variables("");
        let prompt = match self.prompts.render(template, &vars) {
            Ok(prompt) => prompt,
            Err(err) => {
                error!(task_id = %task_id, error = %err, "monologue prompt render failed");
                self.queue.put_event(Event::MonologueReady {
                    task_id,
                    sentences: fallback(FALLBACK_SENTENCES),
                });
                return;
            }
        };

        let llm = self.llm.clone();
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let sentences = match llm.chat(&prompt).await {
                Ok(text) => split_into_sentences(&text),
                Err(err) => {
                    warn!(task_id = %task_id, error = %err, "monologue generation failed, using fallback");
                    fallback(FALLBACK_SENTENCES)
                }
            };
            queue.put_event(Event::MonologueReady { task_id, sentences });
        });
    }
}

pub struct CommentHandler {
    llm: LlmClient,
    prompts: Arc<PromptLibrary>,
    queue: QueueSender,
}

impl CommentHandler {
    pub fn new(llm: LlmClient, prompts: Arc<PromptLibrary>, queue: QueueSender) -> Self {
        Self { llm, prompts, queue }
    }

    pub fn handle(&self, task_id: String, comments: Vec<CommentRecord>, modes: &mut ModeManager) {
        if modes.should_switch_mode(true) {
            modes.switch_mode(None, true);
        }
        modes.increment_duration();

        let summary = summarize_comments(&comments);
        info!(task_id = %task_id, count = comments.len(), "generating comment response");
        let vars = modes.prompt_variables(&summary);
        let prompt = match self.prompts.render("integrated_response", &vars) {
            Ok(prompt) => prompt,
            Err(err) => {
                error!(task_id = %task_id, error = %err, "comment prompt render failed");
                self.queue.put_event(Event::CommentResponseReady {
                    task_id,
                    sentences: fallback(FALLBACK_SENTENCES),
                });
                return;
            }
        };

        let llm = self.llm.clone();
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let sentences = match llm.chat(&prompt).await {
                Ok(text) => split_into_sentences(&text),
                Err(err) => {
                    warn!(task_id = %task_id, error = %err, "comment response failed, using fallback");
                    fallback(FALLBACK_SENTENCES)
                }
            };
            queue.put_event(Event::CommentResponseReady { task_id, sentences });
        });
    }
}

pub struct GreetingHandler {
    llm: LlmClient,
    prompts: Arc<PromptLibrary>,
    queue: QueueSender,
}

impl GreetingHandler {
    pub fn new(llm: LlmClient, prompts: Arc<PromptLibrary>, queue: QueueSender) -> Self {
        Self { llm, prompts, queue }
    }

    pub fn handle_initial(&self, task_id: String, modes: &ModeManager) {
        let vars = modes.prompt_variables("");
        let prompt = match self.prompts.render("initial_greeting", &vars) {
            Ok(prompt) => prompt,
            Err(err) => {
                error!(task_id = %task_id, error = %err, "greeting prompt render failed");
                self.queue.put_event(Event::InitialGreetingReady {
                    task_id,
                    sentences: fallback(FALLBACK_GREETING),
                });
                return;
            }
        };
        let llm = self.llm.clone();
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let sentences = match llm.chat(&prompt).await {
                Ok(text) => split_into_sentences(&text),
                Err(err) => {
                    warn!(task_id = %task_id, error = %err, "greeting generation failed, using fallback");
                    fallback(FALLBACK_GREETING)
                }
            };
            queue.put_event(Event::InitialGreetingReady { task_id, sentences });
        });
    }

    pub fn handle_ending(
        &self,
        task_id: String,
        bridge_text: String,
        stream_summary: String,
        modes: &ModeManager,
    ) {
        let mut vars = modes.prompt_variables("");
        vars.insert("bridge_text", bridge_text);
        vars.insert("stream_summary", stream_summary);
        let prompt = match self.prompts.render("ending_greeting", &vars) {
            Ok(prompt) => prompt,
            Err(err) => {
                error!(task_id = %task_id, error = %err, "ending prompt render failed");
                self.queue.put_event(Event::EndingGreetingReady {
                    task_id,
                    sentences: fallback(FALLBACK_FAREWELL),
                });
                return;
            }
        };
        let llm = self.llm.clone();
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let sentences = match llm.chat(&prompt).await {
                Ok(text) => split_into_sentences(&text),
                Err(err) => {
                    warn!(task_id = %task_id, error = %err, "ending generation failed, using fallback");
                    fallback(FALLBACK_FAREWELL)
                }
            };
            queue.put_event(Event::EndingGreetingReady { task_id, sentences });
        });
    }

    /// Direct farewell generation for the shutdown path, where the dispatcher
    /// loop is no longer pumping the queue. Always returns something to say.
    pub async fn generate_farewell(&self, vars: &HashMap<&'static str, String>) -> Vec<String> {
        let prompt = match self.prompts.render("ending_greeting", vars) {
            Ok(prompt) => prompt,
            Err(_) => return fallback(FALLBACK_FAREWELL),
        };
        match self.llm.chat(&prompt).await {
            Ok(text) => {
                let sentences = split_into_sentences(&text);
                if sentences.is_empty() {
                    fallback(FALLBACK_FAREWELL)
                } else {
                    sentences
                }
            }
            Err(err) => {
                warn!(error = %err, "farewell generation failed, using fallback");
                fallback(FALLBACK_FAREWELL)
            }
        }
    }
}

/// End-of-stream summary writer. The dispatcher records every spoken line;
/// the summary condenses the transcript and persists it for the next stream.
pub struct SummaryHandler {
    llm: LlmClient,
    prompts: Arc<PromptLibrary>,
    queue: QueueSender,
    summary_dir: PathBuf,
    transcript: Vec<String>,
}

impl SummaryHandler {
    pub fn new(
        llm: LlmClient,
        prompts: Arc<PromptLibrary>,
        queue: QueueSender,
        summary_dir: PathBuf,
    ) -> Self {
        Self {
            llm,
            prompts,
            queue,
            summary_dir,
            transcript: Vec::new(),
        }
    }

    pub fn record_line(&mut self, line: &str) {
        self.transcript.push(line.to_string());
    }

    pub fn handle(&self, task_id: String) {
        let mut vars: HashMap<&'static str, String> = HashMap::new();
        vars.insert("transcript", self.transcript.join("\n"));
        let prompt = match self.prompts.render("daily_summary", &vars) {
            Ok(prompt) => prompt,
            Err(err) => {
                error!(task_id = %task_id, error = %err, "summary prompt render failed");
                self.queue.put_event(Event::DailySummaryReady {
                    task_id,
                    summary_text: String::new(),
                    success: false,
                    file_path: None,
                });
                return;
            }
        };

        let llm = self.llm.clone();
        let queue = self.queue.clone();
        let summary_dir = self.summary_dir.clone();
        tokio::spawn(async move {
            let event = match llm.chat(&prompt).await {
                Ok(summary_text) => match write_summary(&summary_dir, &summary_text) {
                    Ok(path) => {
                        info!(task_id = %task_id, path = %path.display(), "daily summary written");
                        Event::DailySummaryReady {
                            task_id,
                            summary_text,
                            success: true,
                            file_path: Some(path),
                        }
                    }
                    Err(err) => {
                        warn!(task_id = %task_id, error = %err, "daily summary write failed");
                        Event::DailySummaryReady {
                            task_id,
                            summary_text,
                            success: false,
                            file_path: None,
                        }
                    }
                },
                Err(err) => {
                    warn!(task_id = %task_id, error = %err, "daily summary generation failed");
                    Event::DailySummaryReady {
                        task_id,
                        summary_text: String::new(),
                        success: false,
                        file_path: None,
                    }
                }
            };
            queue.put_event(event);
        });
    }
}

fn write_summary(dir: &PathBuf, summary_text: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).context("create summary dir")?;
    let epoch_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = dir.join(format!("summary_{epoch_secs}.txt"));
    std::fs::write(&path, summary_text)
        .with_context(|| format!("write summary: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_queue, QueueItem};
    use std::time::Duration;

    fn prompts() -> Arc<PromptLibrary> {
        let mut templates = HashMap::new();
        for name in [
            "normal_monologue",
            "themed_monologue",
            "integrated_response",
            "initial_greeting",
            "ending_greeting",
            "daily_summary",
        ] {
            templates.insert(name.to_string(), format!("{name}: {{current_mode}}"));
        }
        Arc::new(PromptLibrary::from_templates(templates))
    }

    fn dead_llm() -> LlmClient {
        LlmClient::new("http://127.0.0.1:9", "test-model", "key", "persona")
    }

    #[tokio::test]
    async fn monologue_failure_still_emits_exactly_one_ready_event() {
        let (tx, mut rx) = event_queue();
        let handler = MonologueHandler::new(dead_llm(), prompts(), tx);
        let mut modes = ModeManager::new(None);
        handler.handle("t1".to_string(), None, None, &mut modes);

        let item = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out")
            .expect("queue closed");
        match item {
            QueueItem::Event(Event::MonologueReady { task_id, sentences }) => {
                assert_eq!(task_id, "t1");
                assert!(!sentences.is_empty());
            }
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn comment_handler_switches_into_integrated_response() {
        let (tx, mut rx) = event_queue();
        let handler = CommentHandler::new(dead_llm(), prompts(), tx);
        let mut modes = ModeManager::new(None);
        handler.handle("t2".to_string(), Vec::new(), &mut modes);
        assert_eq!(modes.current_mode(), ConversationMode::IntegratedResponse);

        let item = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out")
            .expect("queue closed");
        assert!(matches!(
            item,
            QueueItem::Event(Event::CommentResponseReady { .. })
        ));
    }

    #[tokio::test]
    async fn farewell_generation_never_returns_empty() {
        let (tx, _rx) = event_queue();
        let handler = GreetingHandler::new(dead_llm(), prompts(), tx);
        let modes = ModeManager::new(None);
        let sentences = handler.generate_farewell(&modes.prompt_variables("")).await;
        assert!(!sentences.is_empty());
    }
}
