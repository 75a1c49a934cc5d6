//! Speech recognition engine interface
//!
//! The wake monitor and the capture session drive the same engine and differ
//! only in mode: `Continuous` keeps producing final transcripts until stopped,
//! `OneShot` streams partials and ends after the first final result.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::capture::{MicrophoneTap, SAMPLE_RATE, samples_to_wav};
use super::segmenter::SpeechSegmenter;
use super::stt::SpeechToText;
use crate::Result;

/// How a recognition task finalizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionMode {
    Continuous,
    OneShot,
}

/// Terminal failure of a recognition task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    /// Task was stopped by its owner or the system
    Cancelled,
    /// Engine failed
    Engine(String),
}

impl RecognitionError {
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("recognition cancelled"),
            Self::Engine(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for RecognitionError {}

/// Event streamed by a recognition task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Partial(String),
    Final(String),
    Failed(RecognitionError),
}

/// Synchronous stop handle for a running recognition task
///
/// Stopping removes the input tap and ends the task before returning.
/// Dropping the handle stops the task too.
pub struct RecognitionControl {
    stopper: Option<Box<dyn FnOnce() + Send>>,
}

impl RecognitionControl {
    pub fn new(stopper: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stopper: Some(Box::new(stopper)),
        }
    }

    pub fn stop(mut self) {
        self.run_stopper();
    }

    fn run_stopper(&mut self) {
        if let Some(stop) = self.stopper.take() {
            stop();
        }
    }
}

impl Drop for RecognitionControl {
    fn drop(&mut self) {
        self.run_stopper();
    }
}

impl fmt::Debug for RecognitionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognitionControl")
            .field("stopped", &self.stopper.is_none())
            .finish()
    }
}

/// A started recognition task
#[derive(Debug)]
pub struct RecognitionTask {
    events: mpsc::UnboundedReceiver<RecognitionEvent>,
    control: RecognitionControl,
}

impl RecognitionTask {
    #[must_use]
    pub fn new(
        events: mpsc::UnboundedReceiver<RecognitionEvent>,
        control: RecognitionControl,
    ) -> Self {
        Self { events, control }
    }

    #[must_use]
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<RecognitionEvent>, RecognitionControl) {
        (self.events, self.control)
    }
}

/// Speech recognition engine
pub trait SpeechRecognizer: Send + Sync {
    /// Begin recognizing from the microphone
    ///
    /// Must be called inside a Tokio runtime. The caller is expected to hold
    /// the audio session input claim for the lifetime of the task.
    ///
    /// # Errors
    ///
    /// Returns `EngineStart` if the input device cannot be opened
    fn start(&self, mode: RecognitionMode) -> Result<RecognitionTask>;
}

/// Recognizer backed by the local microphone and a cloud transcription API
pub struct CloudRecognizer {
    stt: Arc<SpeechToText>,
    energy_threshold: f32,
    partial_interval: Duration,
}

impl CloudRecognizer {
    #[must_use]
    pub const fn new(
        stt: Arc<SpeechToText>,
        energy_threshold: f32,
        partial_interval: Duration,
    ) -> Self {
        Self {
            stt,
            energy_threshold,
            partial_interval,
        }
    }
}

impl SpeechRecognizer for CloudRecognizer {
    fn start(&self, mode: RecognitionMode) -> Result<RecognitionTask> {
        let (tap, chunks) = MicrophoneTap::open()?;
        let tap = Arc::new(Mutex::new(Some(tap)));
        let token = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            stt: Arc::clone(&self.stt),
            segmenter: SpeechSegmenter::new(self.energy_threshold),
            mode,
            partial_interval: self.partial_interval,
            token: token.clone(),
            events: events_tx,
        };

        let task_tap = Arc::clone(&tap);
        tokio::spawn(async move {
            worker.run(chunks).await;
            close_tap(&task_tap);
        });

        tracing::debug!(?mode, "recognition started");
        let control = RecognitionControl::new(move || {
            token.cancel();
            close_tap(&tap);
        });
        Ok(RecognitionTask::new(events_rx, control))
    }
}

fn close_tap(slot: &Mutex<Option<MicrophoneTap>>) {
    let tap = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(tap) = tap {
        tap.close();
    }
}

struct Worker {
    stt: Arc<SpeechToText>,
    segmenter: SpeechSegmenter,
    mode: RecognitionMode,
    partial_interval: Duration,
    token: CancellationToken,
    events: mpsc::UnboundedSender<RecognitionEvent>,
}

impl Worker {
    async fn run(mut self, mut chunks: mpsc::UnboundedReceiver<Vec<f32>>) {
        let token = self.token.clone();
        let mut partials = tokio::time::interval(self.partial_interval);
        partials.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let streams_partials = self.mode == RecognitionMode::OneShot;

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    let _ = self.events.send(RecognitionEvent::Failed(RecognitionError::Cancelled));
                    return;
                }
                chunk = chunks.recv() => {
                    let Some(chunk) = chunk else {
                        self.fail("microphone stream ended".to_string());
                        return;
                    };
                    let Some(segment) = self.segmenter.push(&chunk) else {
                        continue;
                    };
                    match self.transcribe(&segment).await {
                        Ok(Some(text)) => {
                            if self.events.send(RecognitionEvent::Final(text)).is_err()
                                || self.mode == RecognitionMode::OneShot
                            {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            self.fail(e.to_string());
                            return;
                        }
                    }
                }
                _ = partials.tick(), if streams_partials => {
                    let Some(audio) = self.segmenter.in_progress().map(<[f32]>::to_vec) else {
                        continue;
                    };
                    match self.transcribe(&audio).await {
                        Ok(Some(text)) => {
                            let _ = self.events.send(RecognitionEvent::Partial(text));
                        }
                        Ok(None) => {}
                        Err(e) => tracing::debug!(error = %e, "partial transcription failed"),
                    }
                }
            }
        }
    }

    fn fail(&self, message: String) {
        tracing::warn!(error = %message, "recognition failed");
        let _ = self
            .events
            .send(RecognitionEvent::Failed(RecognitionError::Engine(message)));
    }

    /// Transcribe a segment; `None` for silence or when cancelled meanwhile
    async fn transcribe(&self, samples: &[f32]) -> Result<Option<String>> {
        let wav = samples_to_wav(samples, SAMPLE_RATE)?;
        let text = tokio::select! {
            () = self.token.cancelled() => return Ok(None),
            text = self.stt.transcribe(&wav) => text?,
        };
        Ok((!text.is_empty()).then_some(text))
    }
}
