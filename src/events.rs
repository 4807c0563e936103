use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// A single chat comment as delivered by the chat source.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct CommentRecord {
    pub username: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub user_id: String,
    pub message_id: String,
    #[serde(default)]
    pub author: CommentAuthor,
    #[serde(default)]
    pub superchat: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct CommentAuthor {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default)]
    pub is_moderator: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub badge_url: Option<String>,
}

/// Closed set of task kinds. Kept as an enum so a completion for an unknown
/// kind is a compile error, not a silent fallthrough.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Monologue,
    MonologueFromTheme,
    CommentResponse,
    PostGreetingCommentResponse,
    InitialGreeting,
    EndingGreeting,
    ThemeIntroReading,
    Filler,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Monologue => "monologue",
            TaskKind::MonologueFromTheme => "monologue_from_theme",
            TaskKind::CommentResponse => "comment_response",
            TaskKind::PostGreetingCommentResponse => "post_greeting_comment_response",
            TaskKind::InitialGreeting => "initial_greeting",
            TaskKind::EndingGreeting => "ending_greeting",
            TaskKind::ThemeIntroReading => "theme_intro_reading",
            TaskKind::Filler => "filler",
        }
    }
}

/// Something that already happened. Consumed by the controller.
#[derive(Clone, Debug)]
pub enum Event {
    AppStarted,
    InitialGreetingRequested,
    EndingGreetingRequested {
        bridge_text: String,
        stream_summary: String,
    },
    MonologueFromThemeRequested {
        theme_file: PathBuf,
    },
    NewCommentReceived {
        comments: Vec<CommentRecord>,
    },
    SpeechPlaybackCompleted {
        task_id: String,
    },
    MonologueReady {
        task_id: String,
        sentences: Vec<String>,
    },
    CommentResponseReady {
        task_id: String,
        sentences: Vec<String>,
    },
    InitialGreetingReady {
        task_id: String,
        sentences: Vec<String>,
    },
    EndingGreetingReady {
        task_id: String,
        sentences: Vec<String>,
    },
    DailySummaryReady {
        task_id: String,
        summary_text: String,
        success: bool,
        file_path: Option<PathBuf>,
    },
    StreamEnded {
        duration: Duration,
        reason: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::AppStarted => "AppStarted",
            Event::InitialGreetingRequested => "InitialGreetingRequested",
            Event::EndingGreetingRequested { .. } => "EndingGreetingRequested",
            Event::MonologueFromThemeRequested { .. } => "MonologueFromThemeRequested",
            Event::NewCommentReceived { .. } => "NewCommentReceived",
            Event::SpeechPlaybackCompleted { .. } => "SpeechPlaybackCompleted",
            Event::MonologueReady { .. } => "MonologueReady",
            Event::CommentResponseReady { .. } => "CommentResponseReady",
            Event::InitialGreetingReady { .. } => "InitialGreetingReady",
            Event::EndingGreetingReady { .. } => "EndingGreetingReady",
            Event::DailySummaryReady { .. } => "DailySummaryReady",
            Event::StreamEnded { .. } => "StreamEnded",
        }
    }
}

/// A request to do work. Every command carries the task id it belongs to.
#[derive(Debug)]
pub enum Command {
    PrepareMonologue {
        task_id: String,
        theme_file: Option<PathBuf>,
        theme_content: Option<String>,
    },
    PrepareCommentResponse {
        task_id: String,
        comments: Vec<CommentRecord>,
    },
    PrepareInitialGreeting {
        task_id: String,
    },
    PrepareEndingGreeting {
        task_id: String,
        bridge_text: String,
        stream_summary: String,
    },
    PrepareDailySummary {
        task_id: String,
    },
    PlaySpeech(PlaySpeech),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::PrepareMonologue { .. } => "PrepareMonologue",
            Command::PrepareCommentResponse { .. } => "PrepareCommentResponse",
            Command::PrepareInitialGreeting { .. } => "PrepareInitialGreeting",
            Command::PrepareEndingGreeting { .. } => "PrepareEndingGreeting",
            Command::PrepareDailySummary { .. } => "PrepareDailySummary",
            Command::PlaySpeech(_) => "PlaySpeech",
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Command::PrepareMonologue { task_id, .. }
            | Command::PrepareCommentResponse { task_id, .. }
            | Command::PrepareInitialGreeting { task_id }
            | Command::PrepareEndingGreeting { task_id, .. }
            | Command::PrepareDailySummary { task_id } => task_id,
            Command::PlaySpeech(play) => &play.task_id,
        }
    }
}

/// Ordered sentences to synthesize and play as one task. `sync_notify`, when
/// present, is signalled once after the final sentence has played (used by the
/// shutdown sequence to wait for the farewell).
#[derive(Debug)]
pub struct PlaySpeech {
    pub task_id: String,
    pub sentences: Vec<String>,
    pub sync_notify: Option<oneshot::Sender<bool>>,
}

impl PlaySpeech {
    pub fn new(task_id: impl Into<String>, sentences: Vec<String>) -> Self {
        Self {
            task_id: task_id.into(),
            sentences,
            sync_notify: None,
        }
    }
}

#[derive(Debug)]
pub enum QueueItem {
    Event(Event),
    Command(Command),
}

pub const PREFETCH_TASK_PREFIX: &str = "prefetch_";
pub const THEME_INTRO_TASK_PREFIX: &str = "theme_intro_";
pub const ENDING_SPEECH_TASK_PREFIX: &str = "ending_speech_";

pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn new_prefetch_task_id() -> String {
    format!("{PREFETCH_TASK_PREFIX}{}", uuid::Uuid::new_v4())
}

pub fn is_prefetch_task(task_id: &str) -> bool {
    task_id.starts_with(PREFETCH_TASK_PREFIX)
}

/// Filler utterances play outside the state machine; their ids make the
/// matching completion events recognizable.
pub fn new_filler_task_id() -> String {
    format!("{}_{}", TaskKind::Filler.as_str(), uuid::Uuid::new_v4())
}

pub fn is_filler_task(task_id: &str) -> bool {
    task_id.starts_with(TaskKind::Filler.as_str())
}

/// Producer handle for the shared event queue. `put` never blocks and never
/// fails while the dispatcher is alive; a send after dispatcher shutdown is
/// dropped silently, which is fine for in-flight worker results.
#[derive(Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl QueueSender {
    pub fn put_event(&self, event: Event) {
        let _ = self.tx.send(QueueItem::Event(event));
    }

    pub fn put_command(&self, command: Command) {
        let _ = self.tx.send(QueueItem::Command(command));
    }
}

pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<QueueItem>,
}

impl QueueReceiver {
    pub async fn recv(&mut self) -> Option<QueueItem> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<QueueItem> {
        self.rx.try_recv().ok()
    }
}

/// Single FIFO shared by every producer and the dispatcher. Events and
/// commands are interleaved in arrival order; ordering beyond that is the
/// state machine's job, not the queue's.
pub fn event_queue() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSender { tx }, QueueReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_insertion_order_across_families() {
        let (tx, mut rx) = event_queue();
        tx.put_event(Event::AppStarted);
        tx.put_command(Command::PrepareInitialGreeting {
            task_id: "t1".to_string(),
        });
        tx.put_event(Event::SpeechPlaybackCompleted {
            task_id: "t1".to_string(),
        });

        assert!(matches!(rx.try_recv(), Some(QueueItem::Event(Event::AppStarted))));
        assert!(matches!(rx.try_recv(), Some(QueueItem::Command(_))));
        assert!(matches!(
            rx.try_recv(),
            Some(QueueItem::Event(Event::SpeechPlaybackCompleted { .. }))
        ));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn prefetch_task_ids_are_recognizable() {
        let id = new_prefetch_task_id();
        assert!(is_prefetch_task(&id));
        assert!(!is_prefetch_task(&new_task_id()));
    }
}
