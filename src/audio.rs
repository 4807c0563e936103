use crate::caption_client::CaptionClient;
use crate::events::{Event, PlaySpeech, QueueSender};
use crate::tts_client::{SynthesizedClip, TtsClient};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum SynthMsg {
    Job(SynthJob),
    Shutdown,
}

struct SynthJob {
    task_id: String,
    text: String,
    index: usize,
    total: usize,
}

enum PlayMsg {
    Clip {
        task_id: String,
        clip: SynthesizedClip,
        text: String,
        index: usize,
        total: usize,
    },
    Shutdown,
}

struct AudioTask {
    total: usize,
    completed_synthesis: usize,
    completed_playback: usize,
    sync_notify: Option<oneshot::Sender<bool>>,
}

/// Two-stage speech pipeline: a synthesis worker turns sentences into WAV
/// clips (substituting silence on failure), a playback worker plays them in
/// order and paces real time. Per-task accounting emits exactly one
/// `SpeechPlaybackCompleted` when the last sentence of a task has played.
///
/// The task map is the only state shared between the workers and the
/// dispatcher; everything else flows through the two channels.
pub struct AudioManager {
    synth_tx: mpsc::UnboundedSender<SynthMsg>,
    tasks: Arc<Mutex<HashMap<String, AudioTask>>>,
    accepting: Arc<AtomicBool>,
    synth_handle: JoinHandle<()>,
    play_handle: JoinHandle<()>,
}

impl AudioManager {
    pub fn new(
        tts: TtsClient,
        caption: CaptionClient,
        queue: QueueSender,
        output_dir: PathBuf,
        silence_clip: Duration,
    ) -> Result<Self> {
        std::fs::create_dir_all(&output_dir).context("create audio output_dir")?;

        let (synth_tx, synth_rx) = mpsc::unbounded_channel();
        let (play_tx, play_rx) = mpsc::unbounded_channel();
        let tasks: Arc<Mutex<HashMap<String, AudioTask>>> = Arc::new(Mutex::new(HashMap::new()));

        let synth_handle = tokio::spawn(synthesis_worker(
            synth_rx,
            play_tx,
            tts,
            tasks.clone(),
            silence_clip,
        ));
        let play_handle = tokio::spawn(playback_worker(
            play_rx,
            caption,
            queue,
            tasks.clone(),
            output_dir,
        ));

        Ok(Self {
            synth_tx,
            tasks,
            accepting: Arc::new(AtomicBool::new(true)),
            synth_handle,
            play_handle,
        })
    }

    /// Accepts one speech task. Empty sentence lists complete immediately so
    /// the state machine is never left waiting on a task with nothing to play.
    pub fn handle_play_speech(&self, play: PlaySpeech, queue: &QueueSender) {
        if !self.accepting.load(Ordering::SeqCst) {
            warn!(task_id = %play.task_id, "audio manager is draining, speech task dropped");
            return;
        }
        let total = play.sentences.len();
        if total == 0 {
            debug!(task_id = %play.task_id, "empty speech task, completing immediately");
            if let Some(notify) = play.sync_notify {
                let _ = notify.send(true);
            }
            queue.put_event(Event::SpeechPlaybackCompleted {
                task_id: play.task_id,
            });
            return;
        }

        info!(task_id = %play.task_id, sentences = total, "speech task accepted");
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.insert(
                play.task_id.clone(),
                AudioTask {
                    total,
                    completed_synthesis: 0,
                    completed_playback: 0,
                    sync_notify: play.sync_notify,
                },
            );
        }
        for (index, text) in play.sentences.into_iter().enumerate() {
            let _ = self.synth_tx.send(SynthMsg::Job(SynthJob {
                task_id: play.task_id.clone(),
                text,
                index,
                total,
            }));
        }
    }

    /// Enters the drain phase: already-queued sentences keep playing, new
    /// speech tasks are refused.
    pub fn stop_new_audio_processing(&self) {
        info!("audio manager refusing new speech tasks");
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Waits until every in-flight task has finished playing, or the timeout
    /// elapses. Best effort; returns whether the pipeline fully drained.
    pub async fn wait_for_current_audio_completion(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = {
                let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
                tasks.len()
            };
            if remaining == 0 {
                info!("audio pipeline drained");
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining, "audio drain timed out, proceeding anyway");
                return false;
            }
            debug!(remaining, "waiting for audio pipeline to drain");
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Stops both workers. Sentinels unblock the channel waits; joining is
    /// bounded so a wedged worker cannot hang shutdown.
    pub async fn stop(self) {
        let _ = self.synth_tx.send(SynthMsg::Shutdown);
        let join = async {
            let _ = self.synth_handle.await;
            let _ = self.play_handle.await;
        };
        if tokio::time::timeout(Duration::from_secs(5), join).await.is_err() {
            warn!("audio workers did not stop in time");
        }
    }
}

async fn synthesis_worker(
    mut rx: mpsc::UnboundedReceiver<SynthMsg>,
    play_tx: mpsc::UnboundedSender<PlayMsg>,
    tts: TtsClient,
    tasks: Arc<Mutex<HashMap<String, AudioTask>>>,
    silence_clip: Duration,
) {
    while let Some(msg) = rx.recv().await {
        let job = match msg {
            SynthMsg::Job(job) => job,
            SynthMsg::Shutdown => break,
        };
        let clip = match tts.synthesize(&job.text).await {
            Ok(clip) => clip,
            Err(err) => {
                // A failed sentence must not stall the task; silence keeps
                // the playback accounting moving.
                warn!(task_id = %job.task_id, index = job.index, error = %err,
                    "synthesis failed, substituting silence");
                SynthesizedClip::silence(silence_clip)
            }
        };
        {
            let mut tasks = tasks.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(task) = tasks.get_mut(&job.task_id) {
                task.completed_synthesis += 1;
                debug!(task_id = %job.task_id,
                    synthesized = task.completed_synthesis, total = task.total,
                    "sentence synthesized");
            }
        }
        let _ = play_tx.send(PlayMsg::Clip {
            task_id: job.task_id,
            clip,
            text: job.text,
            index: job.index,
            total: job.total,
        });
    }
    // Propagate shutdown so the playback worker unblocks too.
    let _ = play_tx.send(PlayMsg::Shutdown);
}

async fn playback_worker(
    mut rx: mpsc::UnboundedReceiver<PlayMsg>,
    caption: CaptionClient,
    queue: QueueSender,
    tasks: Arc<Mutex<HashMap<String, AudioTask>>>,
    output_dir: PathBuf,
) {
    while let Some(msg) = rx.recv().await {
        let (task_id, clip, text, index, total) = match msg {
            PlayMsg::Clip {
                task_id,
                clip,
                text,
                index,
                total,
            } => (task_id, clip, text, index, total),
            PlayMsg::Shutdown => break,
        };

        if let Err(err) = caption.show(&task_id, &text).await {
            warn!(task_id = %task_id, error = %err, "caption show failed");
        }

        if let Some(wav_bytes) = &clip.wav_bytes {
            if let Err(err) = write_and_play(&output_dir, &task_id, index, wav_bytes) {
                warn!(task_id = %task_id, index, error = %err, "audio output failed");
            }
        }
        debug!(task_id = %task_id, index,
            sample_rate = clip.sample_rate,
            secs = clip.duration.as_secs_f64(),
            "playing clip");
        // Real-time pacing: playback is sequential per clip duration whether
        // or not the platform player actually produced sound.
        tokio::time::sleep(clip.duration).await;

        if let Err(err) = caption.clear(&task_id).await {
            warn!(task_id = %task_id, error = %err, "caption clear failed");
        }

        let finished = {
            let mut tasks = tasks.lock().unwrap_or_else(|e| e.into_inner());
            match tasks.get_mut(&task_id) {
                Some(task) => {
                    task.completed_playback += 1;
                    debug!(task_id = %task_id,
                        played = task.completed_playback, total = task.total,
                        "sentence played");
                    if task.completed_playback == task.total {
                        tasks.remove(&task_id)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(task) = finished {
            debug_assert_eq!(task.completed_playback, total);
            info!(task_id = %task_id, sentences = task.total, "speech task completed");
            if let Some(notify) = task.sync_notify {
                let _ = notify.send(true);
            }
            queue.put_event(Event::SpeechPlaybackCompleted { task_id });
        }
    }
}

fn write_and_play(output_dir: &Path, task_id: &str, index: usize, wav_bytes: &[u8]) -> Result<()> {
    let wav_path = output_dir.join(format!("{task_id}_{index}.wav"));
    std::fs::write(&wav_path, wav_bytes)
        .with_context(|| format!("write wav: {}", wav_path.display()))?;
    try_play(&wav_path)
}

fn try_play(wav_path: &Path) -> Result<()> {
    #[cfg(target_os = "windows")]
    {
        let escaped = wav_path.display().to_string().replace("'", "''");
        let cmd = format!("(New-Object Media.SoundPlayer '{escaped}').Play()");
        Command::new("powershell")
            .args(["-NoProfile", "-Command", &cmd])
            .spawn()
            .context("spawn windows sound player")?;
        return Ok(());
    }

    #[cfg(target_os = "macos")]
    {
        Command::new("afplay")
            .arg(wav_path)
            .spawn()
            .context("spawn afplay")?;
        return Ok(());
    }

    #[cfg(target_os = "linux")]
    {
        if Command::new("aplay").arg(wav_path).spawn().is_ok() {
            return Ok(());
        }
        if Command::new("paplay").arg(wav_path).spawn().is_ok() {
            return Ok(());
        }
        anyhow::bail!("no supported linux audio player command found (aplay/paplay)");
    }

    #[allow(unreachable_code)]
    anyhow::bail!("audio playback not implemented for this platform")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_queue, QueueItem, QueueReceiver};

    // Unreachable endpoints: every synthesis fails and the pipeline runs on
    // silence substitution, which is exactly the accounting we want to test.
    fn manager(queue: QueueSender) -> AudioManager {
        let tts = TtsClient::new("http://127.0.0.1:9".to_string(), 1);
        let caption = CaptionClient::new("http://127.0.0.1:9".to_string());
        let dir = std::env::temp_dir().join("aituber-audio-test");
        AudioManager::new(tts, caption, queue, dir, Duration::from_millis(10)).unwrap()
    }

    async fn expect_completion(rx: &mut QueueReceiver, expected_task: &str) {
        let item = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for completion")
            .expect("queue closed");
        match item {
            QueueItem::Event(Event::SpeechPlaybackCompleted { task_id }) => {
                assert_eq!(task_id, expected_task);
            }
            other => panic!("unexpected queue item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_task_completes_immediately() {
        let (tx, mut rx) = event_queue();
        let audio = manager(tx.clone());
        audio.handle_play_speech(PlaySpeech::new("t-empty", Vec::new()), &tx);
        expect_completion(&mut rx, "t-empty").await;
        audio.stop().await;
    }

    #[tokio::test]
    async fn failed_synthesis_still_completes_with_one_event() {
        let (tx, mut rx) = event_queue();
        let audio = manager(tx.clone());
        audio.handle_play_speech(
            PlaySpeech::new("t-two", vec!["A.".to_string(), "B.".to_string()]),
            &tx,
        );
        expect_completion(&mut rx, "t-two").await;
        // Exactly one completion: nothing else should be on the queue.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_none());
        audio.stop().await;
    }

    #[tokio::test]
    async fn sync_notify_fires_on_completion() {
        let (tx, mut rx) = event_queue();
        let audio = manager(tx.clone());
        let (notify_tx, notify_rx) = oneshot::channel();
        let mut play = PlaySpeech::new("t-sync", vec!["さようなら。".to_string()]);
        play.sync_notify = Some(notify_tx);
        audio.handle_play_speech(play, &tx);
        let signalled = tokio::time::timeout(Duration::from_secs(30), notify_rx)
            .await
            .expect("timed out")
            .expect("notify dropped");
        assert!(signalled);
        expect_completion(&mut rx, "t-sync").await;
        audio.stop().await;
    }

    #[tokio::test]
    async fn draining_manager_rejects_new_tasks() {
        let (tx, mut rx) = event_queue();
        let audio = manager(tx.clone());
        audio.stop_new_audio_processing();
        audio.handle_play_speech(PlaySpeech::new("t-late", vec!["A.".to_string()]), &tx);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_none());
        assert!(audio.wait_for_current_audio_completion(Duration::from_secs(1)).await);
        audio.stop().await;
    }
}
