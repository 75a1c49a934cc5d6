//! One-shot speech capture
//!
//! A capture claims the microphone, runs the recognizer in one-shot mode and
//! streams partial transcripts until it finalizes. It finalizes on the
//! engine's final result, a fixed delay after the first non-empty partial,
//! or a listen timeout when nothing is heard at all.
//!
//! `cancel` releases the microphone before returning and the handle then
//! only ever yields [`CaptureEvent::Cancelled`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use super::audio_session::{AudioSession, InputClaim, InputOwner};
use super::recognizer::{
    RecognitionControl, RecognitionError, RecognitionEvent, RecognitionMode, SpeechRecognizer,
};
use crate::Result;

/// Default delay after the first partial before force-finalizing
pub const DEFAULT_FINALIZE_DELAY: Duration = Duration::from_millis(1500);

/// Default time to wait for any speech at all
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(8);

/// Finalize policy for a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Force-finalize this long after the first non-empty partial
    pub finalize_after_first_result: Duration,
    /// Give up with an empty transcript if nothing is heard within this time
    pub listen_timeout: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            finalize_after_first_result: DEFAULT_FINALIZE_DELAY,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
        }
    }
}

/// Result of a finalized capture
///
/// An empty transcript means nothing was heard, which is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CaptureOutcome {
    pub transcript: String,
    /// Engine failure that ended the capture early
    pub error: Option<RecognitionError>,
}

impl CaptureOutcome {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transcript.trim().is_empty()
    }
}

/// Event delivered to the capture owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Partial(String),
    Finished(CaptureOutcome),
    Cancelled,
}

/// Observable state of the capture in progress
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CaptureState {
    pub active: bool,
    pub partial_transcript: String,
}

/// Receiving side of one capture
#[derive(Debug)]
pub struct CaptureHandle {
    events: mpsc::UnboundedReceiver<CaptureEvent>,
    token: CancellationToken,
}

impl CaptureHandle {
    /// Next event; `Cancelled` once the capture was cancelled or has ended
    pub async fn next_event(&mut self) -> CaptureEvent {
        if self.token.is_cancelled() {
            return CaptureEvent::Cancelled;
        }
        tokio::select! {
            biased;
            () = self.token.cancelled() => CaptureEvent::Cancelled,
            event = self.events.recv() => event.unwrap_or(CaptureEvent::Cancelled),
        }
    }

    /// Skip partials and wait for the outcome; `None` if cancelled
    pub async fn finish(mut self) -> Option<CaptureOutcome> {
        loop {
            match self.next_event().await {
                CaptureEvent::Partial(_) => {}
                CaptureEvent::Finished(outcome) => return Some(outcome),
                CaptureEvent::Cancelled => return None,
            }
        }
    }
}

struct LiveCapture {
    control: RecognitionControl,
    claim: InputClaim,
}

type LiveSlot = Arc<Mutex<Option<LiveCapture>>>;

struct ActiveCapture {
    token: CancellationToken,
    live: LiveSlot,
    state: Arc<Mutex<CaptureState>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn release(live: &Mutex<Option<LiveCapture>>) {
    let taken = lock(live).take();
    if let Some(LiveCapture { control, claim }) = taken {
        control.stop();
        drop(claim);
    }
}

/// Drives one-shot captures; at most one is active at a time
pub struct CaptureSession {
    recognizer: Arc<dyn SpeechRecognizer>,
    audio: AudioSession,
    options: CaptureOptions,
    active: Option<ActiveCapture>,
}

impl CaptureSession {
    #[must_use]
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        audio: AudioSession,
        options: CaptureOptions,
    ) -> Self {
        Self {
            recognizer,
            audio,
            options,
            active: None,
        }
    }

    #[must_use]
    pub const fn options(&self) -> CaptureOptions {
        self.options
    }

    /// Start capturing, cancelling any capture still in progress
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `EngineStart` if the microphone is held elsewhere or the
    /// recognizer cannot start
    pub fn start_capture(&mut self) -> Result<CaptureHandle> {
        self.cancel();

        let claim = self.audio.claim_input(InputOwner::SpeechCapture)?;
        let (events, control) = self.recognizer.start(RecognitionMode::OneShot)?.into_parts();

        let token = CancellationToken::new();
        let live: LiveSlot = Arc::new(Mutex::new(Some(LiveCapture { control, claim })));
        let state = Arc::new(Mutex::new(CaptureState {
            active: true,
            partial_transcript: String::new(),
        }));
        let (tx, rx) = mpsc::unbounded_channel();

        let driver = Driver {
            token: token.clone(),
            live: Arc::clone(&live),
            state: Arc::clone(&state),
            options: self.options,
            out: tx,
        };
        tokio::spawn(driver.run(events));

        tracing::debug!("speech capture started");
        self.active = Some(ActiveCapture {
            token: token.clone(),
            live,
            state,
        });

        Ok(CaptureHandle { events: rx, token })
    }

    /// Cancel the capture in progress; no-op when idle
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
            release(&active.live);
            let mut state = lock(&active.state);
            if state.active {
                tracing::debug!("speech capture cancelled");
            }
            *state = CaptureState::default();
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| lock(&active.state).active)
    }

    /// Snapshot of the capture in progress, if any
    #[must_use]
    pub fn state(&self) -> Option<CaptureState> {
        self.active
            .as_ref()
            .map(|active| lock(&active.state).clone())
            .filter(|state| state.active)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Driver {
    token: CancellationToken,
    live: LiveSlot,
    state: Arc<Mutex<CaptureState>>,
    options: CaptureOptions,
    out: mpsc::UnboundedSender<CaptureEvent>,
}

impl Driver {
    async fn run(self, mut events: mpsc::UnboundedReceiver<RecognitionEvent>) {
        let listen_deadline = Instant::now() + self.options.listen_timeout;
        let mut finalize_at: Option<Instant> = None;
        let mut best = String::new();

        let outcome = loop {
            let finalize_deadline = finalize_at;
            let finalize = async move {
                match finalize_deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                () = self.token.cancelled() => return,
                () = finalize => {
                    tracing::debug!(transcript = %best, "force-finalizing after first result");
                    break CaptureOutcome { transcript: std::mem::take(&mut best), error: None };
                }
                () = sleep_until(listen_deadline), if finalize_at.is_none() => {
                    tracing::debug!("nothing heard before listen timeout");
                    break CaptureOutcome::default();
                }
                event = events.recv() => match event {
                    Some(RecognitionEvent::Partial(text)) => {
                        let text = text.trim();
                        if text.is_empty() {
                            continue;
                        }
                        best = text.to_string();
                        finalize_at.get_or_insert_with(|| {
                            Instant::now() + self.options.finalize_after_first_result
                        });
                        lock(&self.state).partial_transcript.clone_from(&best);
                        let _ = self.out.send(CaptureEvent::Partial(best.clone()));
                    }
                    Some(RecognitionEvent::Final(text)) => {
                        let text = text.trim();
                        let transcript = if text.is_empty() {
                            std::mem::take(&mut best)
                        } else {
                            text.to_string()
                        };
                        break CaptureOutcome { transcript, error: None };
                    }
                    Some(RecognitionEvent::Failed(error)) => {
                        tracing::warn!(%error, "recognition failed during capture");
                        break CaptureOutcome {
                            transcript: std::mem::take(&mut best),
                            error: Some(error),
                        };
                    }
                    None => {
                        break CaptureOutcome {
                            transcript: std::mem::take(&mut best),
                            error: Some(RecognitionError::Engine(
                                "recognition ended unexpectedly".to_string(),
                            )),
                        };
                    }
                },
            }
        };

        let taken = {
            let mut live = lock(&self.live);
            if self.token.is_cancelled() {
                return;
            }
            {
                let mut state = lock(&self.state);
                state.active = false;
                state.partial_transcript.clone_from(&outcome.transcript);
            }
            tracing::debug!(transcript = %outcome.transcript, "speech capture finalized");
            let _ = self.out.send(CaptureEvent::Finished(outcome));
            live.take()
        };

        if let Some(LiveCapture { control, claim }) = taken {
            control.stop();
            drop(claim);
        }
    }
}
