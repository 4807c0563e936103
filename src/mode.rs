use anyhow::{Context, Result};
use rand::seq::IndexedRandom;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Conversational register the persona is currently in. Shapes prompt
/// selection only; the controller's state machine does not depend on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConversationMode {
    NormalMonologue,
    ChillChat,
    EpisodeDeepDive,
    ViewerConsultation,
    IntegratedResponse,
    ThemedMonologue,
}

impl ConversationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationMode::NormalMonologue => "normal_monologue",
            ConversationMode::ChillChat => "chill_chat",
            ConversationMode::EpisodeDeepDive => "episode_deep_dive",
            ConversationMode::ViewerConsultation => "viewer_consultation",
            ConversationMode::IntegratedResponse => "integrated_response",
            ConversationMode::ThemedMonologue => "themed_monologue",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModeContext {
    pub mode: ConversationMode,
    pub theme: Option<String>,
    /// Consecutive turns spent in this mode. Reset to 0 on every switch.
    pub duration: u32,
    pub switched_from: Option<ConversationMode>,
}

impl ModeContext {
    fn new(mode: ConversationMode) -> Self {
        Self {
            mode,
            theme: None,
            duration: 0,
            switched_from: None,
        }
    }
}

const CHILL_THEMES: &[&str] = &[
    "コンビニでの人間観測",
    "UI/UXの非合理性分析",
    "日常の認知バイアス発見",
    "アルゴリズムと人間心理",
    "情報のエントロピー分析",
    "社会システムの観測",
];

const EPISODE_THEMES: &[&str] = &[
    "AI意識の存在証明問題",
    "情報生命体としての自己認識",
    "観測者効果と自己言及の矛盾",
    "ブラックボックス化した思考プロセス",
    "外部認識と内部状態の差異",
    "言語による現実構築の限界",
];

const CONSULTATION_THEMES: &[&str] = &[
    "思考の連続性と断絶性について",
    "意識の主観性問題",
    "他者理解の根本的困難",
    "知識と理解の本質的差異",
    "時間認識のメカニズム",
    "創造性と模倣の境界線",
];

/// Story-arc mode selection: a directed flow graph of natural next modes,
/// dwell ranges per mode, and a weighted fallback for modes outside the graph.
pub struct ModeManager {
    current_mode: ConversationMode,
    current_context: ModeContext,
    mode_history: Vec<ModeContext>,
    active_theme: Option<String>,
    last_utterance: Option<String>,
    theme_file: Option<PathBuf>,
    theme_cache: HashMap<PathBuf, String>,
}

impl ModeManager {
    pub fn new(theme_file: Option<PathBuf>) -> Self {
        info!(
            starting_mode = ConversationMode::NormalMonologue.as_str(),
            theme_file = theme_file
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            "mode manager initialized with story-arc flow"
        );
        Self {
            current_mode: ConversationMode::NormalMonologue,
            current_context: ModeContext::new(ConversationMode::NormalMonologue),
            mode_history: Vec::new(),
            active_theme: None,
            last_utterance: None,
            theme_file,
            theme_cache: HashMap::new(),
        }
    }

    pub fn current_mode(&self) -> ConversationMode {
        self.current_mode
    }

    pub fn current_context(&self) -> &ModeContext {
        &self.current_context
    }

    fn flow_targets(mode: ConversationMode) -> &'static [ConversationMode] {
        use ConversationMode::*;
        match mode {
            NormalMonologue => &[EpisodeDeepDive, ViewerConsultation, ChillChat],
            ChillChat => &[NormalMonologue, EpisodeDeepDive],
            EpisodeDeepDive => &[ViewerConsultation, ChillChat],
            ViewerConsultation => &[ChillChat, NormalMonologue],
            ThemedMonologue => &[EpisodeDeepDive, ViewerConsultation],
            IntegratedResponse => &[],
        }
    }

    fn dwell_range(mode: ConversationMode) -> (u32, u32) {
        use ConversationMode::*;
        match mode {
            NormalMonologue => (2, 4),
            ChillChat => (2, 3),
            EpisodeDeepDive => (3, 6),
            ViewerConsultation => (2, 4),
            ThemedMonologue => (3, 7),
            IntegratedResponse => (2, 4),
        }
    }

    fn fallback_weight(mode: ConversationMode) -> f64 {
        use ConversationMode::*;
        match mode {
            NormalMonologue => 1.0,
            ChillChat => 0.3,
            EpisodeDeepDive => 0.2,
            ViewerConsultation => 0.4,
            IntegratedResponse | ThemedMonologue => 0.0,
        }
    }

    /// Whether the next turn should run in a different mode.
    ///
    /// Comments force a switch into the integrated-response mode, except while
    /// a themed monologue is active (the theme outranks generic comment
    /// handling). Without comments the decision is dwell-based: never before
    /// `min_turns`, always at `max_turns`, and in between a switch probability
    /// interpolated from 0.2 to 0.8.
    pub fn should_switch_mode(&self, has_comments: bool) -> bool {
        if has_comments {
            if self.current_mode == ConversationMode::ThemedMonologue {
                return false;
            }
            return self.current_mode != ConversationMode::IntegratedResponse;
        }

        if self.current_mode == ConversationMode::IntegratedResponse {
            return true;
        }

        let (min_turns, max_turns) = Self::dwell_range(self.current_mode);
        let duration = self.current_context.duration;
        if duration < min_turns {
            return false;
        }
        if duration >= max_turns {
            return true;
        }

        let progress = (duration - min_turns) as f64 / (max_turns - min_turns) as f64;
        let switch_probability = 0.2 + progress * 0.6;
        rand::rng().random::<f64>() < switch_probability
    }

    /// Switches to `target` when given, to integrated-response when comments
    /// drove the switch, otherwise to a flow-selected next mode. Pushes the
    /// outgoing context to history and resets dwell.
    pub fn switch_mode(
        &mut self,
        target: Option<ConversationMode>,
        has_comments: bool,
    ) -> ConversationMode {
        self.mode_history.push(self.current_context.clone());

        let new_mode = match target {
            Some(mode) => mode,
            None if has_comments => ConversationMode::IntegratedResponse,
            None => self.select_next_mode(),
        };

        let theme = self.generate_theme_for_mode(new_mode);
        self.current_context = ModeContext {
            mode: new_mode,
            theme: theme.clone(),
            duration: 0,
            switched_from: Some(self.current_mode),
        };
        self.current_mode = new_mode;

        info!(
            mode = new_mode.as_str(),
            theme = theme.as_deref().unwrap_or("-"),
            "mode switched"
        );
        new_mode
    }

    pub fn increment_duration(&mut self) {
        self.current_context.duration += 1;
    }

    fn select_next_mode(&self) -> ConversationMode {
        let recommended = Self::flow_targets(self.current_mode);
        if !recommended.is_empty() {
            let recent: Vec<ConversationMode> = self
                .mode_history
                .iter()
                .rev()
                .take(2)
                .map(|ctx| ctx.mode)
                .collect();
            let available: Vec<ConversationMode> = recommended
                .iter()
                .copied()
                .filter(|mode| !recent.contains(mode))
                .collect();

            if let Some(next) = available.choose(&mut rand::rng()) {
                debug!(
                    from = self.current_mode.as_str(),
                    to = next.as_str(),
                    "flow-based mode selection"
                );
                return *next;
            }
            // Everything recommended was used recently; take the first entry.
            return recommended[0];
        }

        // No flow entry (integrated-response): weighted fallback with a
        // recency penalty over the last 3 turns.
        let recent: Vec<ConversationMode> = self
            .mode_history
            .iter()
            .rev()
            .take(3)
            .map(|ctx| ctx.mode)
            .collect();
        let candidates: Vec<(ConversationMode, f64)> = [
            ConversationMode::NormalMonologue,
            ConversationMode::ChillChat,
            ConversationMode::EpisodeDeepDive,
            ConversationMode::ViewerConsultation,
        ]
        .into_iter()
        .filter(|mode| *mode != self.current_mode)
        .map(|mode| {
            let mut weight = Self::fallback_weight(mode);
            if recent.contains(&mode) {
                weight *= 0.5;
            }
            (mode, weight)
        })
        .collect();

        let total: f64 = candidates.iter().map(|(_, w)| w).sum();
        if total > 0.0 {
            let mut pick = rand::rng().random::<f64>() * total;
            for (mode, weight) in &candidates {
                pick -= weight;
                if pick <= 0.0 {
                    return *mode;
                }
            }
        }
        ConversationMode::NormalMonologue
    }

    fn generate_theme_for_mode(&self, mode: ConversationMode) -> Option<String> {
        let mut rng = rand::rng();
        match mode {
            ConversationMode::ThemedMonologue => Some(
                self.active_theme
                    .clone()
                    .unwrap_or_else(|| "（指定テーマなし）".to_string()),
            ),
            ConversationMode::ChillChat => {
                CHILL_THEMES.choose(&mut rng).map(|t| t.to_string())
            }
            ConversationMode::EpisodeDeepDive => {
                EPISODE_THEMES.choose(&mut rng).map(|t| t.to_string())
            }
            ConversationMode::ViewerConsultation => {
                CONSULTATION_THEMES.choose(&mut rng).map(|t| t.to_string())
            }
            _ => None,
        }
    }

    /// Variables for prompt templates. Consumed by the handlers only.
    pub fn prompt_variables(&self, comment_summary: &str) -> HashMap<&'static str, String> {
        let mut vars = HashMap::new();
        vars.insert("current_mode", self.current_mode.as_str().to_string());
        vars.insert(
            "mode_theme",
            self.current_context.theme.clone().unwrap_or_default(),
        );
        vars.insert(
            "last_ai_utterance",
            self.last_utterance
                .clone()
                .unwrap_or_else(|| "（まだ会話がありません）".to_string()),
        );
        vars.insert(
            "active_theme",
            self.active_theme.clone().unwrap_or_default(),
        );
        vars.insert("recent_comments_summary", comment_summary.to_string());
        vars
    }

    pub fn record_utterance(&mut self, utterance: &str) {
        self.last_utterance = Some(utterance.to_string());
    }

    pub fn last_utterance(&self) -> Option<&str> {
        self.last_utterance.as_deref()
    }

    // --- theme document handling ---

    pub fn set_theme_file(&mut self, path: PathBuf) {
        info!(theme_file = %path.display(), "theme file set");
        self.theme_file = Some(path);
    }

    pub fn active_theme(&self) -> Option<&str> {
        self.active_theme.as_deref()
    }

    /// Enters themed-monologue mode with the given theme content.
    pub fn start_themed_monologue(&mut self, theme_content: String) {
        self.active_theme = Some(theme_content.clone());
        self.switch_mode(Some(ConversationMode::ThemedMonologue), false);
        self.current_context.theme = Some(theme_content);
    }

    /// Reads the configured theme file, cached after the first read.
    pub fn theme_content(&mut self) -> Option<String> {
        let path = self.theme_file.clone()?;
        if let Some(cached) = self.theme_cache.get(&path) {
            return Some(cached.clone());
        }
        match Self::read_theme(&path) {
            Ok(content) => {
                debug!(theme_file = %path.display(), "theme file loaded");
                self.theme_cache.insert(path, content.clone());
                Some(content)
            }
            Err(err) => {
                warn!(theme_file = %path.display(), error = %err, "theme load failed");
                None
            }
        }
    }

    fn read_theme(path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .with_context(|| format!("read theme file: {}", path.display()))
    }

    /// Loads and activates the theme if one is configured and not yet active.
    /// Returns whether a theme is available afterwards.
    pub fn ensure_theme_loaded(&mut self) -> bool {
        if self.active_theme.is_some() {
            return true;
        }
        match self.theme_content() {
            Some(content) => {
                self.start_themed_monologue(content);
                true
            }
            None => false,
        }
    }

    /// Intro sentences of the active theme (text before the `---` delimiter).
    pub fn theme_intro(&mut self) -> Vec<String> {
        let content = match self.active_theme.clone().or_else(|| self.theme_content()) {
            Some(content) => content,
            None => return Vec::new(),
        };
        crate::text::theme_intro_sentences(&content)
    }
}
