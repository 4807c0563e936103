use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

fn default_prefetch_capacity() -> usize {
    2
}

fn default_prefetch_ttl_secs() -> u64 {
    300
}

fn default_dispatch_tick_ms() -> u64 {
    100
}

fn default_audio_drain_timeout_secs() -> u64 {
    300
}

fn default_silence_clip_ms() -> u64 {
    400
}

fn default_filter_timeout_secs() -> u64 {
    10
}

fn default_filter_max_concurrency() -> usize {
    8
}

fn default_chat_poll_interval_ms() -> u64 {
    2000
}

fn default_shutdown_request_file() -> PathBuf {
    PathBuf::from("shutdown_request.txt")
}

#[derive(Clone, Debug, Deserialize)]
pub struct OrchestratorConfig {
    pub llm_url: String,
    pub llm_model: String,
    /// Name of the environment variable holding the API key. Resolved at
    /// startup; a missing key aborts before any component starts.
    pub llm_api_key_env: String,

    pub tts_url: String,
    pub tts_speaker_id: u32,
    pub caption_url: String,
    pub chat_url: String,
    #[serde(default = "default_chat_poll_interval_ms")]
    pub chat_poll_interval_ms: u64,

    pub prompts_dir: PathBuf,
    pub summary_dir: PathBuf,
    pub audio_output_dir: PathBuf,
    #[serde(default)]
    pub theme_file: Option<PathBuf>,
    #[serde(default)]
    pub comment_filter_path: Option<PathBuf>,

    #[serde(default = "default_prefetch_capacity")]
    pub prefetch_capacity: usize,
    #[serde(default = "default_prefetch_ttl_secs")]
    pub prefetch_ttl_secs: u64,

    #[serde(default = "default_dispatch_tick_ms")]
    pub dispatch_tick_ms: u64,
    #[serde(default = "default_shutdown_request_file")]
    pub shutdown_request_file: PathBuf,
    #[serde(default = "default_audio_drain_timeout_secs")]
    pub audio_drain_timeout_secs: u64,
    #[serde(default = "default_silence_clip_ms")]
    pub silence_clip_ms: u64,

    #[serde(default = "default_filter_timeout_secs")]
    pub filter_timeout_secs: u64,
    #[serde(default = "default_filter_max_concurrency")]
    pub filter_max_concurrency: usize,
}

impl OrchestratorConfig {
    pub fn load(path: &str) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read config: {path}"))?;
        let cfg: OrchestratorConfig = toml::from_str(&s).context("parse toml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm_url.trim().is_empty() {
            bail!("llm_url must not be empty");
        }
        if self.llm_model.trim().is_empty() {
            bail!("llm_model must not be empty");
        }
        if self.llm_api_key_env.trim().is_empty() {
            bail!("llm_api_key_env must not be empty");
        }
        if self.tts_url.trim().is_empty() {
            bail!("tts_url must not be empty");
        }
        if self.caption_url.trim().is_empty() {
            bail!("caption_url must not be empty");
        }
        if self.chat_url.trim().is_empty() {
            bail!("chat_url must not be empty");
        }
        if self.prefetch_capacity == 0 {
            bail!("prefetch_capacity must be > 0");
        }
        if self.dispatch_tick_ms == 0 {
            bail!("dispatch_tick_ms must be > 0");
        }
        if self.chat_poll_interval_ms == 0 {
            bail!("chat_poll_interval_ms must be > 0");
        }
        if self.filter_max_concurrency == 0 {
            bail!("filter_max_concurrency must be > 0");
        }
        Ok(())
    }

    /// Fail-fast API key resolution. Called once during startup.
    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.llm_api_key_env)
            .with_context(|| format!("missing API key in env var {}", self.llm_api_key_env))
    }
}
