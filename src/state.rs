use crate::events::{CommentRecord, TaskKind};
use std::time::Instant;
use tracing::info;

/// Current operating state of the persona.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemState {
    Idle,
    /// Waiting on an LLM generation.
    Thinking,
    /// Audio is playing.
    Speaking,
    /// Reading a theme document aloud; comments are not accepted.
    Reading,
    Starting,
}

impl SystemState {
    pub fn as_str(self) -> &'static str {
        match self {
            SystemState::Idle => "idle",
            SystemState::Thinking => "thinking",
            SystemState::Speaking => "speaking",
            SystemState::Reading => "reading",
            SystemState::Starting => "starting",
        }
    }
}

/// Pure data holder for the dispatcher's view of the world.
///
/// Owned and mutated exclusively by the dispatcher task; worker tasks report
/// back only through events on the queue. That single-owner rule is what makes
/// this lock-free, so never hand references to spawned tasks.
pub struct StateManager {
    current_state: SystemState,
    current_task_id: Option<String>,
    current_task_kind: Option<TaskKind>,
    task_started_at: Option<Instant>,
    pending_comments: Vec<CommentRecord>,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            current_state: SystemState::Idle,
            current_task_id: None,
            current_task_kind: None,
            task_started_at: None,
            pending_comments: Vec::new(),
        }
    }

    pub fn set_state(
        &mut self,
        new_state: SystemState,
        task_id: Option<String>,
        task_kind: Option<TaskKind>,
    ) {
        info!(
            old_state = self.current_state.as_str(),
            new_state = new_state.as_str(),
            old_task_id = self.current_task_id.as_deref().unwrap_or("-"),
            new_task_id = task_id.as_deref().unwrap_or("-"),
            new_task_kind = task_kind.map(TaskKind::as_str).unwrap_or("-"),
            "state transition"
        );
        self.current_state = new_state;
        self.current_task_id = task_id;
        self.current_task_kind = task_kind;
        self.task_started_at = match new_state {
            SystemState::Thinking | SystemState::Speaking => Some(Instant::now()),
            _ => None,
        };
    }

    /// Drops the current task and returns to idle.
    pub fn finish_task(&mut self) {
        info!(
            finished_task_id = self.current_task_id.as_deref().unwrap_or("-"),
            finished_task_kind = self.current_task_kind.map(TaskKind::as_str).unwrap_or("-"),
            "finishing task"
        );
        self.set_state(SystemState::Idle, None, None);
    }

    pub fn state(&self) -> SystemState {
        self.current_state
    }

    pub fn current_task_id(&self) -> Option<&str> {
        self.current_task_id.as_deref()
    }

    pub fn current_task_kind(&self) -> Option<TaskKind> {
        self.current_task_kind
    }

    pub fn task_duration(&self) -> Option<std::time::Duration> {
        self.task_started_at.map(|t| t.elapsed())
    }

    pub fn is_idle(&self) -> bool {
        self.current_state == SystemState::Idle
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self.current_state,
            SystemState::Thinking | SystemState::Speaking
        )
    }

    /// Comments are accepted while idle or speaking; never while reading a
    /// theme aloud or mid-generation.
    pub fn can_handle_comment(&self) -> bool {
        matches!(self.current_state, SystemState::Idle | SystemState::Speaking)
    }

    pub fn add_pending_comment(&mut self, comment: CommentRecord) {
        self.pending_comments.push(comment);
    }

    pub fn has_pending_comments(&self) -> bool {
        !self.pending_comments.is_empty()
    }

    /// Drains the whole backlog in arrival order.
    pub fn take_pending_comments(&mut self) -> Vec<CommentRecord> {
        std::mem::take(&mut self.pending_comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn timing_recorded_only_for_active_states() {
        let mut state = StateManager::new();
        state.set_state(
            SystemState::Thinking,
            Some("t1".to_string()),
            Some(TaskKind::Monologue),
        );
        assert!(state.task_duration().is_some());

        state.finish_task();
        assert!(state.task_duration().is_none());
        assert!(state.current_task_id().is_none());
        assert!(state.is_idle());
    }

    #[test]
    fn comment_acceptance_depends_on_state() {
        let mut state = StateManager::new();
        assert!(state.can_handle_comment());

        state.set_state(
            SystemState::Speaking,
            Some("t1".to_string()),
            Some(TaskKind::Monologue),
        );
        assert!(state.can_handle_comment());

        state.set_state(
            SystemState::Thinking,
            Some("t2".to_string()),
            Some(TaskKind::CommentResponse),
        );
        assert!(!state.can_handle_comment());

        state.set_state(
            SystemState::Reading,
            Some("t3".to_string()),
            Some(TaskKind::ThemeIntroReading),
        );
        assert!(!state.can_handle_comment());
    }

    #[test]
    fn pending_comments_drain_in_order() {
        let mut state = StateManager::new();
        state.add_pending_comment(comment("first"));
        state.add_pending_comment(comment("second"));
        assert!(state.has_pending_comments());

        let drained = state.take_pending_comments();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message, "first");
        assert_eq!(drained[1].message, "second");
        assert!(!state.has_pending_comments());
    }
}
