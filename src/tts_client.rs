use anyhow::{Context, Result};
use std::io::Cursor;
use std::time::Duration;

/// One synthesized sentence. `wav_bytes` is `None` for the silence substitute
/// used when synthesis fails.
#[derive(Debug)]
pub struct SynthesizedClip {
    pub wav_bytes: Option<Vec<u8>>,
    pub sample_rate: u32,
    pub duration: Duration,
}

impl SynthesizedClip {
    pub fn silence(duration: Duration) -> Self {
        Self {
            wav_bytes: None,
            sample_rate: 24_000,
            duration,
        }
    }
}

/// AivisSpeech/VOICEVOX-style engine adapter: an audio query is built for the
/// text, then synthesized to WAV.
#[derive(Clone)]
pub struct TtsClient {
    http: reqwest::Client,
    base_url: String,
    speaker_id: u32,
}

impl TtsClient {
    pub fn new(base_url: String, speaker_id: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            speaker_id,
        }
    }

    pub async fn synthesize(&self, text: &str) -> Result<SynthesizedClip> {
        let query_url = format!("{}/audio_query", self.base_url);
        let res = self
            .http
            .post(query_url)
            .query(&[("text", text), ("speaker", &self.speaker_id.to_string())])
            .send()
            .await
            .context("tts audio_query request failed")?;
        if !res.status().is_success() {
            anyhow::bail!("tts audio_query returned non-success status: {}", res.status());
        }
        let audio_query: serde_json::Value =
            res.json().await.context("tts audio_query decode failed")?;

        let synth_url = format!("{}/synthesis", self.base_url);
        let res = self
            .http
            .post(synth_url)
            .query(&[("speaker", &self.speaker_id.to_string())])
            .json(&audio_query)
            .send()
            .await
            .context("tts synthesis request failed")?;
        if !res.status().is_success() {
            anyhow::bail!("tts synthesis returned non-success status: {}", res.status());
        }

        let wav_bytes = res.bytes().await.context("read tts wav bytes")?.to_vec();
        let (sample_rate, duration) = wav_duration(&wav_bytes)?;
        Ok(SynthesizedClip {
            wav_bytes: Some(wav_bytes),
            sample_rate,
            duration,
        })
    }
}

/// Reads sample rate and play length from WAV bytes so the playback worker
/// can pace real time.
fn wav_duration(wav_bytes: &[u8]) -> Result<(u32, Duration)> {
    let reader = hound::WavReader::new(Cursor::new(wav_bytes)).context("parse wav header")?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        anyhow::bail!("wav has zero sample rate");
    }
    let seconds = reader.duration() as f64 / spec.sample_rate as f64;
    Ok((spec.sample_rate, Duration::from_secs_f64(seconds)))
}
