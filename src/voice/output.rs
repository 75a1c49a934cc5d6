//! Speech and cue output backends

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::playback::{AudioPlayback, decode_mp3, tone};
use super::tts::TextToSpeech;
use crate::{Error, Result};

/// One unit of synthesized speech
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    /// Speaking rate multiplier, 1.0 is normal
    pub rate: f32,
    /// Voice override; `None` uses the backend default
    pub voice: Option<String>,
}

impl Utterance {
    #[must_use]
    pub fn new(text: impl Into<String>, rate: f32) -> Self {
        Self {
            text: text.into(),
            rate,
            voice: None,
        }
    }

    #[must_use]
    pub fn with_voice(mut self, voice: Option<String>) -> Self {
        self.voice = voice;
        self
    }
}

/// Speaks a single utterance
///
/// The returned future resolves once the audio has finished playing.
/// Dropping the future must stop the audio.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn say(&self, utterance: &Utterance) -> Result<()>;
}

/// Short audible acknowledgment played on wake detection
pub trait WakeCue: Send + Sync {
    /// Start the cue without blocking the caller
    fn acknowledge(&self);
}

/// Cloud TTS played through the default output device
pub struct CloudSpeechOutput {
    tts: TextToSpeech,
    playback: AudioPlayback,
}

impl CloudSpeechOutput {
    #[must_use]
    pub const fn new(tts: TextToSpeech, playback: AudioPlayback) -> Self {
        Self { tts, playback }
    }
}

struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl SpeechOutput for CloudSpeechOutput {
    async fn say(&self, utterance: &Utterance) -> Result<()> {
        let mp3 = self
            .tts
            .synthesize(&utterance.text, utterance.voice.as_deref(), utterance.rate)
            .await?;
        let samples = decode_mp3(&mp3)?;

        let stop = Arc::new(AtomicBool::new(false));
        let _guard = StopOnDrop(Arc::clone(&stop));
        let playback = self.playback.clone();
        tokio::task::spawn_blocking(move || playback.play_blocking(samples, &stop))
            .await
            .map_err(|e| Error::Audio(e.to_string()))?
    }
}

/// Two-note chime
pub struct ToneCue {
    playback: AudioPlayback,
    samples: Arc<Vec<f32>>,
}

impl ToneCue {
    #[must_use]
    pub fn new(playback: AudioPlayback) -> Self {
        let mut samples = tone(660.0, Duration::from_millis(90), 0.25);
        samples.extend(tone(990.0, Duration::from_millis(120), 0.25));
        Self {
            playback,
            samples: Arc::new(samples),
        }
    }
}

impl WakeCue for ToneCue {
    fn acknowledge(&self) {
        let playback = self.playback.clone();
        let samples = self.samples.as_ref().clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = playback.play_blocking(samples, &AtomicBool::new(false)) {
                tracing::warn!(error = %e, "wake cue failed");
            }
        });
    }
}

/// Cue that does nothing, for headless runs
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentCue;

impl WakeCue for SilentCue {
    fn acknowledge(&self) {}
}
