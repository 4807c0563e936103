use crate::events::{
    new_prefetch_task_id, new_task_id, Command, Event, PlaySpeech, QueueSender, TaskKind,
    ENDING_SPEECH_TASK_PREFIX, THEME_INTRO_TASK_PREFIX,
};
use crate::mode::{ConversationMode, ModeManager};
use crate::state::{StateManager, SystemState};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Exactly two comment-response rounds are allowed after the initial greeting
/// before theme reading is forced. Bounds how long a viewer wave can delay
/// the scripted introduction.
const POST_GREETING_RESPONSE_LIMIT: u32 = 2;

struct PrefetchEntry {
    task_id: String,
    sentences: Vec<String>,
    created_at: Instant,
}

struct QueuedResponse {
    task_id: String,
    sentences: Vec<String>,
    kind: TaskKind,
}

/// The state machine. Every event maps to at most one state transition and
/// zero or more emitted commands; anything it cannot act on right now is
/// parked (pending backlog, queued responses, prefetch queue) rather than
/// reordered on the queue.
///
/// Runs only on the dispatcher task. Handler workers feed it exclusively
/// through events on the shared queue.
pub struct MainController {
    queue: QueueSender,
    prefetch: VecDeque<PrefetchEntry>,
    prefetch_capacity: usize,
    prefetch_ttl: Duration,
    is_prefetching: bool,
    queued_responses: VecDeque<QueuedResponse>,
    post_greeting_response_count: u32,
}

impl MainController {
    pub fn new(queue: QueueSender, prefetch_capacity: usize, prefetch_ttl: Duration) -> Self {
        Self {
            queue,
            prefetch: VecDeque::new(),
            prefetch_capacity,
            prefetch_ttl,
            is_prefetching: false,
            queued_responses: VecDeque::new(),
            post_greeting_response_count: 0,
        }
    }

    pub fn on_event(&mut self, event: Event, state: &mut StateManager, modes: &mut ModeManager) {
        debug!(event = event.name(), state = state.state().as_str(), "controller event");
        match event {
            Event::AppStarted => {
                if state.is_idle() {
                    self.queue.put_event(Event::InitialGreetingRequested);
                }
            }
            Event::InitialGreetingRequested => {
                let task_id = new_task_id();
                state.set_state(
                    SystemState::Thinking,
                    Some(task_id.clone()),
                    Some(TaskKind::InitialGreeting),
                );
                self.queue
                    .put_command(Command::PrepareInitialGreeting { task_id });
            }
            Event::InitialGreetingReady { task_id, sentences } => {
                self.play(state, task_id, sentences, TaskKind::InitialGreeting);
            }
            Event::EndingGreetingRequested {
                bridge_text,
                stream_summary,
            } => {
                let task_id = format!("{ENDING_SPEECH_TASK_PREFIX}{}", uuid::Uuid::new_v4());
                state.set_state(
                    SystemState::Thinking,
                    Some(task_id.clone()),
                    Some(TaskKind::EndingGreeting),
                );
                self.queue.put_command(Command::PrepareEndingGreeting {
                    task_id,
                    bridge_text,
                    stream_summary,
                });
            }
            Event::EndingGreetingReady { task_id, sentences } => {
                self.play(state, task_id, sentences, TaskKind::EndingGreeting);
            }
            Event::MonologueFromThemeRequested { theme_file } => {
                let task_id = new_task_id();
                state.set_state(
                    SystemState::Thinking,
                    Some(task_id.clone()),
                    Some(TaskKind::MonologueFromTheme),
                );
                self.queue.put_command(Command::PrepareMonologue {
                    task_id,
                    theme_file: Some(theme_file),
                    theme_content: None,
                });
            }
            Event::NewCommentReceived { comments } => {
                self.on_new_comments(comments, state);
            }
            Event::SpeechPlaybackCompleted { task_id } => {
                self.on_playback_completed(task_id, state, modes);
            }
            Event::MonologueReady { task_id, sentences } => {
                self.on_monologue_ready(task_id, sentences, state);
            }
            Event::CommentResponseReady { task_id, sentences } => {
                self.on_comment_response_ready(task_id, sentences, state, modes);
            }
            Event::DailySummaryReady {
                task_id,
                success,
                file_path,
                ..
            } => {
                info!(
                    task_id = %task_id,
                    success,
                    path = file_path
                        .as_deref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    "daily summary finished"
                );
            }
            Event::StreamEnded { duration, reason } => {
                info!(duration_secs = duration.as_secs(), reason = %reason, "stream ended");
                self.queue.put_command(Command::PrepareDailySummary {
                    task_id: new_task_id(),
                });
            }
        }
    }

    fn on_new_comments(&mut self, comments: Vec<crate::events::CommentRecord>, state: &mut StateManager) {
        match state.state() {
            SystemState::Idle => {
                let task_id = new_task_id();
                state.set_state(
                    SystemState::Thinking,
                    Some(task_id.clone()),
                    Some(TaskKind::CommentResponse),
                );
                self.queue.put_command(Command::PrepareCommentResponse {
                    task_id,
                    comments,
                });
            }
            SystemState::Speaking => {
                // Generate in parallel with the ongoing playback; the result
                // is parked until the current speech finishes. The backlog
                // copy keeps the comments answerable if generation fails.
                let task_id = new_task_id();
                for comment in &comments {
                    state.add_pending_comment(comment.clone());
                }
                self.queue.put_command(Command::PrepareCommentResponse {
                    task_id,
                    comments,
                });
            }
            SystemState::Thinking | SystemState::Reading | SystemState::Starting => {
                debug!(
                    count = comments.len(),
                    state = state.state().as_str(),
                    "comments parked in backlog"
                );
                for comment in comments {
                    state.add_pending_comment(comment);
                }
            }
        }
    }

    fn on_playback_completed(
        &mut self,
        task_id: String,
        state: &mut StateManager,
        modes: &mut ModeManager,
    ) {
        if state.current_task_id() != Some(task_id.as_str()) {
            if crate::events::is_filler_task(&task_id) {
                debug!(task_id = %task_id, "filler playback finished");
            } else {
                warn!(
                    completed_task_id = %task_id,
                    current_task_id = state.current_task_id().unwrap_or("-"),
                    "stale speech completion ignored"
                );
            }
            return;
        }
        if let Some(duration) = state.task_duration() {
            debug!(task_id = %task_id, secs = duration.as_secs_f64(), "speech finished");
        }

        // Responses generated in parallel outrank every other scheduling
        // decision once the floor is free.
        if let Some(queued) = self.queued_responses.pop_front() {
            info!(task_id = %queued.task_id, "playing queued comment response");
            self.play(state, queued.task_id, queued.sentences, queued.kind);
            return;
        }

        match state.current_task_kind() {
            Some(TaskKind::InitialGreeting) => {
                if !self.respond_to_pending(state, TaskKind::PostGreetingCommentResponse) {
                    self.start_theme_reading(state, modes);
                }
            }
            Some(TaskKind::PostGreetingCommentResponse) => {
                if self.post_greeting_response_count >= POST_GREETING_RESPONSE_LIMIT {
                    self.start_theme_reading(state, modes);
                } else if !self.respond_to_pending(state, TaskKind::PostGreetingCommentResponse) {
                    self.start_theme_reading(state, modes);
                }
            }
            Some(TaskKind::ThemeIntroReading) | Some(TaskKind::CommentResponse) => {
                if !self.respond_to_pending(state, TaskKind::CommentResponse) {
                    state.finish_task();
                    self.play_next_prefetched(state);
                }
            }
            Some(TaskKind::Monologue) | Some(TaskKind::MonologueFromTheme) => {
                state.finish_task();
                self.play_next_prefetched(state);
            }
            other => {
                debug!(
                    task_kind = other.map(TaskKind::as_str).unwrap_or("-"),
                    "completion for untracked task kind"
                );
                state.finish_task();
            }
        }
    }

    fn on_monologue_ready(&mut self, task_id: String, sentences: Vec<String>, state: &mut StateManager) {
        if crate::events::is_prefetch_task(&task_id) {
            self.is_prefetching = false;
            self.evict_stale_prefetch();
            if self.prefetch.len() < self.prefetch_capacity {
                debug!(task_id = %task_id, queued = self.prefetch.len() + 1, "prefetched monologue stored");
                self.prefetch.push_back(PrefetchEntry {
                    task_id,
                    sentences,
                    created_at: Instant::now(),
                });
            } else {
                debug!(task_id = %task_id, "prefetch queue full, result dropped");
            }
            self.start_prefetch_if_needed();
            if state.is_idle() {
                self.play_next_prefetched(state);
            }
            return;
        }

        let kind = match state.current_task_kind() {
            Some(TaskKind::MonologueFromTheme) => TaskKind::MonologueFromTheme,
            _ => TaskKind::Monologue,
        };
        self.play(state, task_id, sentences, kind);
    }

    fn on_comment_response_ready(
        &mut self,
        task_id: String,
        sentences: Vec<String>,
        state: &mut StateManager,
        modes: &ModeManager,
    ) {
        match state.state() {
            SystemState::Thinking => {
                // Keep the task kind that was set when generation started;
                // post-greeting responses must complete as post-greeting.
                let kind = state
                    .current_task_kind()
                    .unwrap_or(TaskKind::CommentResponse);
                self.maybe_invalidate_prefetch(modes);
                self.play(state, task_id, sentences, kind);
            }
            SystemState::Speaking | SystemState::Reading => {
                debug!(task_id = %task_id, "comment response queued behind current speech");
                self.queued_responses.push_back(QueuedResponse {
                    task_id,
                    sentences,
                    kind: TaskKind::CommentResponse,
                });
            }
            SystemState::Idle | SystemState::Starting => {
                // No task is waiting on this response; the source comments
                // are still in the backlog and will be answered from there.
                warn!(
                    task_id = %task_id,
                    state = state.state().as_str(),
                    "comment response arrived with no task in flight, dropped"
                );
            }
        }
    }

    fn play(&mut self, state: &mut StateManager, task_id: String, sentences: Vec<String>, kind: TaskKind) {
        let speech_state = if kind == TaskKind::ThemeIntroReading {
            SystemState::Reading
        } else {
            SystemState::Speaking
        };
        state.set_state(speech_state, Some(task_id.clone()), Some(kind));
        self.queue
            .put_command(Command::PlaySpeech(PlaySpeech::new(task_id, sentences)));
    }

    /// Drains the full pending backlog into one comment-response task.
    /// Returns whether anything was started.
    fn respond_to_pending(&mut self, state: &mut StateManager, kind: TaskKind) -> bool {
        if !state.has_pending_comments() {
            return false;
        }
        let comments = state.take_pending_comments();
        if kind == TaskKind::PostGreetingCommentResponse {
            self.post_greeting_response_count += 1;
            info!(
                round = self.post_greeting_response_count,
                "post-greeting comment response round"
            );
        }
        let task_id = new_task_id();
        state.set_state(SystemState::Thinking, Some(task_id.clone()), Some(kind));
        self.queue.put_command(Command::PrepareCommentResponse {
            task_id,
            comments,
        });
        true
    }

    /// Reads the active theme's introductory segment aloud. With no theme or
    /// an empty intro, falls through to prefetch without entering READING.
    fn start_theme_reading(&mut self, state: &mut StateManager, modes: &mut ModeManager) {
        if !modes.ensure_theme_loaded() {
            debug!("no theme available, skipping intro reading");
            state.finish_task();
            self.play_next_prefetched(state);
            return;
        }
        let intro = modes.theme_intro();
        if intro.is_empty() {
            debug!("theme has no intro segment, skipping straight to prefetch");
            state.finish_task();
            self.play_next_prefetched(state);
            return;
        }
        let task_id = format!("{THEME_INTRO_TASK_PREFIX}{}", uuid::Uuid::new_v4());
        info!(task_id = %task_id, sentences = intro.len(), "reading theme introduction");
        self.play(state, task_id, intro, TaskKind::ThemeIntroReading);
    }

    // --- prefetch subsystem ---

    /// One `PrepareMonologue` is requested whenever the queue has room and no
    /// prefetch is already in flight. Hides LLM latency behind whatever is
    /// currently playing.
    fn start_prefetch_if_needed(&mut self) {
        self.evict_stale_prefetch();
        if self.is_prefetching || self.prefetch.len() >= self.prefetch_capacity {
            return;
        }
        let task_id = new_prefetch_task_id();
        debug!(task_id = %task_id, queued = self.prefetch.len(), "requesting prefetch monologue");
        self.is_prefetching = true;
        self.queue.put_command(Command::PrepareMonologue {
            task_id,
            theme_file: None,
            theme_content: None,
        });
    }

    /// Pops the oldest prefetched monologue and plays it, refilling the
    /// queue behind it. No-op when nothing usable is prefetched.
    fn play_next_prefetched(&mut self, state: &mut StateManager) {
        self.evict_stale_prefetch();
        let entry = match self.prefetch.pop_front() {
            Some(entry) => entry,
            None => {
                self.start_prefetch_if_needed();
                return;
            }
        };
        self.start_prefetch_if_needed();
        info!(task_id = %entry.task_id, "playing prefetched monologue");
        self.play(state, entry.task_id, entry.sentences, TaskKind::Monologue);
    }

    fn evict_stale_prefetch(&mut self) {
        let ttl = self.prefetch_ttl;
        let before = self.prefetch.len();
        self.prefetch.retain(|entry| entry.created_at.elapsed() < ttl);
        if self.prefetch.len() < before {
            debug!(evicted = before - self.prefetch.len(), "stale prefetch entries evicted");
        }
    }

    /// Replaceable policy: after a comment response, decide whether the
    /// prefetched monologues still fit the conversation. Themed streams
    /// always keep them; otherwise only TTL-stale entries go, since a queue
    /// of at most a couple entries is cheaper to keep than to regenerate.
    fn maybe_invalidate_prefetch(&mut self, modes: &ModeManager) {
        if modes.active_theme().is_some()
            || modes.current_mode() == ConversationMode::ThemedMonologue
        {
            return;
        }
        self.evict_stale_prefetch();
        if self.prefetch.len() <= 1 {
            return;
        }
        debug!(queued = self.prefetch.len(), "prefetch kept after comment response");
    }

    #[cfg(test)]
    fn prefetch_len(&self) -> usize {
        self.prefetch.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_queue, CommentRecord, QueueItem, QueueReceiver};

    fn comment(msg: &str) -> CommentRecord {
        CommentRecord {
            username: "viewer".to_string(),
            message: msg.to_string(),
            timestamp: String::new(),
            user_id: "u1".to_string(),
            message_id: msg.to_string(),
            author: Default::default(),
            superchat: None,
        }
    }

    struct Fixture {
        controller: MainController,
        state: StateManager,
        modes: ModeManager,
        rx: QueueReceiver,
    }

    fn fixture() -> Fixture {
        let (tx, rx) = event_queue();
        Fixture {
            controller: MainController::new(tx, 2, Duration::from_secs(300)),
            state: StateManager::new(),
            modes: ModeManager::new(None),
            rx,
        }
    }

    impl Fixture {
        fn feed(&mut self, event: Event) {
            self.controller
                .on_event(event, &mut self.state, &mut self.modes);
        }

        fn next(&mut self) -> Option<QueueItem> {
            self.rx.try_recv()
        }
    }

    #[test]
    fn stale_completion_changes_nothing() {
        let mut fx = fixture();
        fx.state.set_state(
            SystemState::Speaking,
            Some("current".to_string()),
            Some(TaskKind::Monologue),
        );
        fx.feed(Event::SpeechPlaybackCompleted {
            task_id: "someone-else".to_string(),
        });
        assert_eq!(fx.state.state(), SystemState::Speaking);
        assert_eq!(fx.state.current_task_id(), Some("current"));
        assert!(fx.next().is_none());
    }

    #[test]
    fn greeting_flow_reaches_speaking_with_same_task_id() {
        let mut fx = fixture();
        fx.feed(Event::AppStarted);
        let requested = fx.next();
        assert!(matches!(
            requested,
            Some(QueueItem::Event(Event::InitialGreetingRequested))
        ));

        fx.feed(Event::InitialGreetingRequested);
        assert_eq!(fx.state.state(), SystemState::Thinking);
        let task_id = match fx.next() {
            Some(QueueItem::Command(Command::PrepareInitialGreeting { task_id })) => task_id,
            other => panic!("unexpected item: {other:?}"),
        };
        assert_eq!(fx.state.current_task_id(), Some(task_id.as_str()));

        fx.feed(Event::InitialGreetingReady {
            task_id: task_id.clone(),
            sentences: vec!["こんにちは。".to_string()],
        });
        assert_eq!(fx.state.state(), SystemState::Speaking);
        match fx.next() {
            Some(QueueItem::Command(Command::PlaySpeech(play))) => {
                assert_eq!(play.task_id, task_id);
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn post_greeting_cap_allows_exactly_two_rounds() {
        let mut fx = fixture();
        fx.feed(Event::AppStarted);
        let mut response_rounds = 0;
        let mut guard = 0;
        loop {
            guard += 1;
            assert!(guard < 100, "scenario did not terminate");
            let item = match fx.next() {
                Some(item) => item,
                None => break,
            };
            match item {
                QueueItem::Event(event) => fx.feed(event),
                QueueItem::Command(Command::PrepareInitialGreeting { task_id }) => {
                    fx.feed(Event::InitialGreetingReady {
                        task_id,
                        sentences: vec!["こんにちは。".to_string()],
                    });
                }
                QueueItem::Command(Command::PrepareCommentResponse { task_id, .. }) => {
                    response_rounds += 1;
                    fx.feed(Event::CommentResponseReady {
                        task_id,
                        sentences: vec!["コメントありがとう。".to_string()],
                    });
                }
                QueueItem::Command(Command::PlaySpeech(play)) => {
                    // Comments are always waiting when speech finishes.
                    fx.state.add_pending_comment(comment("next"));
                    fx.feed(Event::SpeechPlaybackCompleted {
                        task_id: play.task_id,
                    });
                }
                QueueItem::Command(Command::PrepareMonologue { task_id, .. }) => {
                    // Prefetch has started: the post-greeting phase is over.
                    assert!(crate::events::is_prefetch_task(&task_id));
                    break;
                }
                other => panic!("unexpected item: {other:?}"),
            }
        }
        assert_eq!(response_rounds, 2);
    }

    #[test]
    fn greeting_without_comments_goes_to_theme_reading() {
        let mut fx = fixture();
        fx.modes.start_themed_monologue("導入文。\n---\n本文。".to_string());
        fx.state.set_state(
            SystemState::Speaking,
            Some("g1".to_string()),
            Some(TaskKind::InitialGreeting),
        );
        fx.feed(Event::SpeechPlaybackCompleted {
            task_id: "g1".to_string(),
        });

        assert_eq!(fx.state.state(), SystemState::Reading);
        assert_eq!(fx.state.current_task_kind(), Some(TaskKind::ThemeIntroReading));
        match fx.next() {
            Some(QueueItem::Command(Command::PlaySpeech(play))) => {
                assert!(play.task_id.starts_with(THEME_INTRO_TASK_PREFIX));
                assert_eq!(play.sentences, vec!["導入文。"]);
                assert_eq!(fx.state.current_task_id(), Some(play.task_id.as_str()));
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn parallel_comment_response_waits_for_current_speech() {
        let mut fx = fixture();
        fx.state.set_state(
            SystemState::Speaking,
            Some("m1".to_string()),
            Some(TaskKind::Monologue),
        );
        fx.feed(Event::CommentResponseReady {
            task_id: "c1".to_string(),
            sentences: vec!["返事。".to_string()],
        });
        // Parked, not played.
        assert_eq!(fx.state.current_task_id(), Some("m1"));
        assert!(fx.next().is_none());

        fx.feed(Event::SpeechPlaybackCompleted {
            task_id: "m1".to_string(),
        });
        assert_eq!(fx.state.state(), SystemState::Speaking);
        assert_eq!(fx.state.current_task_id(), Some("c1"));
        assert_eq!(fx.state.current_task_kind(), Some(TaskKind::CommentResponse));
        match fx.next() {
            Some(QueueItem::Command(Command::PlaySpeech(play))) => {
                assert_eq!(play.task_id, "c1");
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn prefetch_queue_never_exceeds_capacity() {
        let mut fx = fixture();
        fx.state.set_state(
            SystemState::Speaking,
            Some("m1".to_string()),
            Some(TaskKind::Monologue),
        );
        for i in 0..10 {
            fx.feed(Event::MonologueReady {
                task_id: format!("prefetch_{i}"),
                sentences: vec!["独り言。".to_string()],
            });
            assert!(fx.controller.prefetch_len() <= 2);
        }
    }

    #[test]
    fn prefetched_monologue_plays_after_current_monologue() {
        let mut fx = fixture();
        fx.state.set_state(
            SystemState::Speaking,
            Some("m1".to_string()),
            Some(TaskKind::Monologue),
        );
        fx.feed(Event::MonologueReady {
            task_id: "prefetch_a".to_string(),
            sentences: vec!["次の話。".to_string()],
        });
        // Stored plus a refill request while speaking continues.
        assert_eq!(fx.controller.prefetch_len(), 1);
        match fx.next() {
            Some(QueueItem::Command(Command::PrepareMonologue { task_id, .. })) => {
                assert!(crate::events::is_prefetch_task(&task_id));
            }
            other => panic!("unexpected item: {other:?}"),
        }

        fx.feed(Event::SpeechPlaybackCompleted {
            task_id: "m1".to_string(),
        });
        assert_eq!(fx.state.state(), SystemState::Speaking);
        assert_eq!(fx.state.current_task_id(), Some("prefetch_a"));
        assert_eq!(fx.controller.prefetch_len(), 0);
    }

    #[test]
    fn full_prefetch_queue_is_consumed_after_comment_response() {
        let mut fx = fixture();
        fx.state.set_state(
            SystemState::Speaking,
            Some("c1".to_string()),
            Some(TaskKind::CommentResponse),
        );
        fx.feed(Event::MonologueReady {
            task_id: "prefetch_a".to_string(),
            sentences: vec!["一つ目。".to_string()],
        });
        fx.feed(Event::MonologueReady {
            task_id: "prefetch_b".to_string(),
            sentences: vec!["二つ目。".to_string()],
        });
        assert_eq!(fx.controller.prefetch_len(), 2);
        // Refill request from the first store; the second found the queue full.
        assert!(matches!(
            fx.next(),
            Some(QueueItem::Command(Command::PrepareMonologue { .. }))
        ));
        assert!(fx.next().is_none());

        // Comment response finishes with an empty backlog: the stored
        // monologue must play rather than the system going idle on it.
        fx.feed(Event::SpeechPlaybackCompleted {
            task_id: "c1".to_string(),
        });
        assert_eq!(fx.state.state(), SystemState::Speaking);
        assert_eq!(fx.state.current_task_id(), Some("prefetch_a"));
        assert_eq!(fx.state.current_task_kind(), Some(TaskKind::Monologue));
        assert_eq!(fx.controller.prefetch_len(), 1);

        let mut saw_refill = false;
        let mut saw_play = false;
        while let Some(item) = fx.next() {
            match item {
                QueueItem::Command(Command::PrepareMonologue { task_id, .. }) => {
                    assert!(crate::events::is_prefetch_task(&task_id));
                    saw_refill = true;
                }
                QueueItem::Command(Command::PlaySpeech(play)) => {
                    assert_eq!(play.task_id, "prefetch_a");
                    saw_play = true;
                }
                other => panic!("unexpected item: {other:?}"),
            }
        }
        assert!(saw_refill);
        assert!(saw_play);
    }

    #[test]
    fn theme_intro_completion_consumes_prefetch_too() {
        let mut fx = fixture();
        fx.state.set_state(
            SystemState::Reading,
            Some("intro1".to_string()),
            Some(TaskKind::ThemeIntroReading),
        );
        fx.feed(Event::MonologueReady {
            task_id: "prefetch_a".to_string(),
            sentences: vec!["本題。".to_string()],
        });
        while fx.next().is_some() {}

        fx.feed(Event::SpeechPlaybackCompleted {
            task_id: "intro1".to_string(),
        });
        assert_eq!(fx.state.state(), SystemState::Speaking);
        assert_eq!(fx.state.current_task_id(), Some("prefetch_a"));
        assert_eq!(fx.controller.prefetch_len(), 0);
    }

    #[test]
    fn comment_response_with_no_task_in_flight_is_dropped() {
        let mut fx = fixture();
        fx.feed(Event::CommentResponseReady {
            task_id: "late".to_string(),
            sentences: vec!["返事。".to_string()],
        });
        assert_eq!(fx.state.state(), SystemState::Idle);
        assert!(fx.state.current_task_id().is_none());
        assert!(fx.next().is_none());
    }

    #[test]
    fn comments_during_thinking_go_to_backlog_only() {
        let mut fx = fixture();
        fx.state.set_state(
            SystemState::Thinking,
            Some("t1".to_string()),
            Some(TaskKind::CommentResponse),
        );
        fx.feed(Event::NewCommentReceived {
            comments: vec![comment("hello")],
        });
        assert!(fx.state.has_pending_comments());
        assert!(fx.next().is_none());
    }

    #[test]
    fn comments_while_speaking_generate_in_parallel() {
        let mut fx = fixture();
        fx.state.set_state(
            SystemState::Speaking,
            Some("m1".to_string()),
            Some(TaskKind::Monologue),
        );
        fx.feed(Event::NewCommentReceived {
            comments: vec![comment("hello")],
        });
        // State untouched, generation requested, backlog keeps a copy.
        assert_eq!(fx.state.state(), SystemState::Speaking);
        assert_eq!(fx.state.current_task_id(), Some("m1"));
        assert!(fx.state.has_pending_comments());
        assert!(matches!(
            fx.next(),
            Some(QueueItem::Command(Command::PrepareCommentResponse { .. }))
        ));
    }

    #[test]
    fn post_greeting_kind_is_preserved_through_ready() {
        let mut fx = fixture();
        fx.state.set_state(
            SystemState::Thinking,
            Some("p1".to_string()),
            Some(TaskKind::PostGreetingCommentResponse),
        );
        fx.feed(Event::CommentResponseReady {
            task_id: "p1".to_string(),
            sentences: vec!["ようこそ。".to_string()],
        });
        assert_eq!(
            fx.state.current_task_kind(),
            Some(TaskKind::PostGreetingCommentResponse)
        );
        assert_eq!(fx.state.state(), SystemState::Speaking);
    }

    #[test]
    fn stream_end_requests_daily_summary() {
        let mut fx = fixture();
        fx.feed(Event::StreamEnded {
            duration: Duration::from_secs(3600),
            reason: "scheduled".to_string(),
        });
        assert!(matches!(
            fx.next(),
            Some(QueueItem::Command(Command::PrepareDailySummary { .. }))
        ));
    }
}
