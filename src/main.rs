mod audio;
mod caption_client;
mod chat_source;
mod comment_filter;
mod config;
mod controller;
mod events;
mod filler;
mod handlers;
mod llm_client;
mod mode;
mod prompts;
mod state;
mod text;
mod tts_client;

use anyhow::{Context, Result};
use audio::AudioManager;
use caption_client::CaptionClient;
use chat_source::ChatSource;
use comment_filter::{CommentFilter, FilterConfig};
use config::OrchestratorConfig;
use controller::MainController;
use events::{event_queue, Command, Event, PlaySpeech, QueueItem};
use filler::FillerState;
use handlers::{CommentHandler, GreetingHandler, MonologueHandler, SummaryHandler};
use llm_client::LlmClient;
use mode::ModeManager;
use prompts::PromptLibrary;
use state::StateManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tts_client::TtsClient;

fn theme_arg() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--theme" => {
                let path = args.next().context("--theme requires a file path")?;
                return Ok(Some(PathBuf::from(path)));
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let cfg_path = std::env::var("AITUBER_ORCH_CONFIG")
        .unwrap_or_else(|_| "config/orchestrator.toml".to_string());
    let cfg = OrchestratorConfig::load(&cfg_path)?;
    let api_key = cfg.resolve_api_key()?;
    let theme_file = theme_arg()?.or_else(|| cfg.theme_file.clone());

    let prompts = Arc::new(PromptLibrary::load(&cfg.prompts_dir).context("load prompts")?);
    let llm = LlmClient::new(&cfg.llm_url, &cfg.llm_model, api_key, prompts.persona());

    let (queue_tx, mut queue_rx) = event_queue();

    let filter_config = match &cfg.comment_filter_path {
        Some(path) => FilterConfig::load(path)?,
        None => FilterConfig::default(),
    };
    let filter = CommentFilter::new(
        filter_config,
        cfg.filter_max_concurrency,
        Duration::from_secs(cfg.filter_timeout_secs),
    );
    let chat = ChatSource::new(
        cfg.chat_url.clone(),
        Duration::from_millis(cfg.chat_poll_interval_ms),
        filter,
        queue_tx.clone(),
    )
    .spawn();

    let tts = TtsClient::new(cfg.tts_url.clone(), cfg.tts_speaker_id);
    let caption = CaptionClient::new(cfg.caption_url.clone());
    let audio = AudioManager::new(
        tts,
        caption,
        queue_tx.clone(),
        cfg.audio_output_dir.clone(),
        Duration::from_millis(cfg.silence_clip_ms),
    )?;

    let mut state = StateManager::new();
    let mut modes = ModeManager::new(theme_file);
    let mut controller = MainController::new(
        queue_tx.clone(),
        cfg.prefetch_capacity,
        Duration::from_secs(cfg.prefetch_ttl_secs),
    );
    let mut filler = FillerState::new();

    let monologue_handler = MonologueHandler::new(llm.clone(), prompts.clone(), queue_tx.clone());
    let comment_handler = CommentHandler::new(llm.clone(), prompts.clone(), queue_tx.clone());
    let greeting_handler = GreetingHandler::new(llm.clone(), prompts.clone(), queue_tx.clone());
    let mut summary_handler = SummaryHandler::new(
        llm,
        prompts,
        queue_tx.clone(),
        cfg.summary_dir.clone(),
    );

    info!("orchestrator started");
    queue_tx.put_event(Event::AppStarted);

    let tick = Duration::from_millis(cfg.dispatch_tick_ms);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if cfg.shutdown_request_file.exists() {
            info!(file = %cfg.shutdown_request_file.display(), "shutdown request file found");
            if let Err(err) = std::fs::remove_file(&cfg.shutdown_request_file) {
                warn!(error = %err, "could not remove shutdown request file");
            }
            break;
        }

        tokio::select! {
            item = queue_rx.recv() => {
                let Some(item) = item else { break };
                if !is_filler_completion(&item) {
                    filler.reset();
                }
                match item {
                    QueueItem::Event(event) => {
                        controller.on_event(event, &mut state, &mut modes);
                    }
                    QueueItem::Command(command) => {
                        debug!(
                            command = command.name(),
                            task_id = %command.task_id(),
                            "dispatching command"
                        );
                        match command {
                            Command::PrepareMonologue { task_id, theme_file, theme_content } => {
                                monologue_handler.handle(task_id, theme_file, theme_content, &mut modes);
                            }
                            Command::PrepareCommentResponse { task_id, comments } => {
                                comment_handler.handle(task_id, comments, &mut modes);
                            }
                            Command::PrepareInitialGreeting { task_id } => {
                                greeting_handler.handle_initial(task_id, &modes);
                            }
                            Command::PrepareEndingGreeting { task_id, bridge_text, stream_summary } => {
                                greeting_handler.handle_ending(task_id, bridge_text, stream_summary, &modes);
                            }
                            Command::PrepareDailySummary { task_id } => {
                                summary_handler.handle(task_id);
                            }
                            Command::PlaySpeech(play) => {
                                let line = play.sentences.join("");
                                if !line.is_empty() {
                                    modes.record_utterance(&line);
                                    summary_handler.record_line(&line);
                                }
                                audio.handle_play_speech(play, &queue_tx);
                            }
                        }
                    }
                }
            }
            _ = &mut ctrl_c => {
                info!("interrupt received");
                break;
            }
            _ = tokio::time::sleep(tick) => {
                if state.is_idle() {
                    if let Some(phrase) = filler.poll() {
                        // Fillers play outside the state machine; their
                        // completion events are ignored as stale.
                        let task_id = events::new_filler_task_id();
                        info!(task_id = %task_id, "playing filler phrase");
                        audio.handle_play_speech(
                            PlaySpeech::new(task_id, vec![phrase.to_string()]),
                            &queue_tx,
                        );
                    }
                }
            }
        }
    }

    // Graceful shutdown: say goodbye, let the pipeline drain, write the
    // daily summary, then exit 0 no matter what triggered us.
    info!("starting shutdown sequence");
    chat.abort();

    let mut vars = modes.prompt_variables("");
    vars.insert("bridge_text", String::new());
    vars.insert("stream_summary", modes.last_utterance().unwrap_or("").to_string());
    let farewell = greeting_handler.generate_farewell(&vars).await;
    summary_handler.record_line(&farewell.join(""));

    let (notify_tx, notify_rx) = tokio::sync::oneshot::channel();
    let mut play = PlaySpeech::new(
        format!("{}{}", events::ENDING_SPEECH_TASK_PREFIX, uuid::Uuid::new_v4()),
        farewell,
    );
    play.sync_notify = Some(notify_tx);
    audio.handle_play_speech(play, &queue_tx);
    audio.stop_new_audio_processing();

    let drain = Duration::from_secs(cfg.audio_drain_timeout_secs);
    if tokio::time::timeout(drain, notify_rx).await.is_err() {
        warn!("farewell did not finish within the drain timeout");
    }
    audio.wait_for_current_audio_completion(drain).await;
    audio.stop().await;

    summary_handler.handle(events::new_task_id());
    let summary_wait = async {
        while let Some(item) = queue_rx.recv().await {
            if let QueueItem::Event(Event::DailySummaryReady { success, .. }) = item {
                info!(success, "daily summary finished");
                break;
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(60), summary_wait).await.is_err() {
        warn!("daily summary did not finish before exit");
    }

    info!("shutdown complete");
    Ok(())
}

fn is_filler_completion(item: &QueueItem) -> bool {
    matches!(
        item,
        QueueItem::Event(Event::SpeechPlaybackCompleted { task_id })
            if events::is_filler_task(task_id)
    )
}
