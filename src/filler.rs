use rand::seq::IndexedRandom;
use rand::Rng;
use std::time::{Duration, Instant};

const MIN_SILENCE: Duration = Duration::from_secs(3);
const INITIAL_INTERVAL: Duration = Duration::from_secs(10);

const FILLER_PHRASES: &[&str] = &[
    "えーっと…",
    "うーん、そうですね…",
    "ちょっと考え中です…",
    "なんというか…",
    "コメント、お待ちしてますね。",
];

/// Filler-phrase timing, owned by the dispatcher loop. Tracks how long the
/// system has been idle with an empty queue and decides when a short filler
/// utterance should cover the silence.
pub struct FillerState {
    silence_start: Option<Instant>,
    last_filler: Option<Instant>,
    interval: Duration,
}

impl FillerState {
    pub fn new() -> Self {
        Self {
            silence_start: None,
            last_filler: None,
            interval: INITIAL_INTERVAL,
        }
    }

    /// Called whenever any real work flows through the dispatcher.
    pub fn reset(&mut self) {
        self.silence_start = None;
        self.last_filler = None;
        self.interval = INITIAL_INTERVAL;
    }

    /// Called on every idle tick. Returns a phrase when silence has lasted
    /// long enough and the filler interval has elapsed; subsequent fillers are
    /// spaced by a fresh random interval so they do not sound mechanical.
    pub fn poll(&mut self) -> Option<&'static str> {
        let now = Instant::now();
        let silence_start = *self.silence_start.get_or_insert(now);
        if now.duration_since(silence_start) < MIN_SILENCE {
            return None;
        }
        let reference = self.last_filler.unwrap_or(silence_start);
        if now.duration_since(reference) < self.interval {
            return None;
        }
        self.last_filler = Some(now);
        self.interval = Duration::from_secs(rand::rng().random_range(15..=30));
        FILLER_PHRASES.choose(&mut rand::rng()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_filler_during_initial_silence() {
        let mut filler = FillerState::new();
        assert!(filler.poll().is_none());
        assert!(filler.poll().is_none());
    }

    #[test]
    fn filler_fires_once_interval_has_elapsed() {
        let mut filler = FillerState::new();
        let long_ago = Instant::now() - Duration::from_secs(60);
        filler.silence_start = Some(long_ago);
        assert!(filler.poll().is_some());
        // Immediately afterwards the fresh interval has not elapsed.
        assert!(filler.poll().is_none());
    }

    #[test]
    fn reset_restarts_the_silence_clock() {
        let mut filler = FillerState::new();
        filler.silence_start = Some(Instant::now() - Duration::from_secs(60));
        assert!(filler.poll().is_some());
        filler.reset();
        assert!(filler.poll().is_none());
    }
}
