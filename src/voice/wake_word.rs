//! Wake phrase detection
//!
//! [`WakePhraseMatcher`] is a deliberately loose heuristic: a transcript
//! matches if it contains a trigger phrase, or if any word contains a short
//! alias (covers mishearings such as "wordie" for "wordy"). False positives
//! are caught later by the spoken confirmation.
//!
//! [`WakePhraseMonitor`] keeps a continuous recognizer running, restarting it
//! after engine errors, and auto-pauses after each detection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::audio_session::{AudioSession, InputClaim, InputOwner};
use super::output::WakeCue;
use super::recognizer::{
    RecognitionControl, RecognitionError, RecognitionEvent, RecognitionMode, SpeechRecognizer,
};
use crate::{Error, Result};

/// Default delay before restarting after an engine error
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(500);

fn normalize(s: &str) -> String {
    s.to_lowercase().trim().to_string()
}

/// Matches transcripts against trigger phrases and short aliases
#[derive(Debug, Clone)]
pub struct WakePhraseMatcher {
    phrases: Vec<String>,
    aliases: Vec<String>,
}

impl WakePhraseMatcher {
    /// # Errors
    ///
    /// Returns `Config` if no non-empty phrase or alias is given
    pub fn new(phrases: Vec<String>, aliases: Vec<String>) -> Result<Self> {
        let clean = |list: Vec<String>| -> Vec<String> {
            list.iter()
                .map(|s| normalize(s))
                .filter(|s| !s.is_empty())
                .collect()
        };
        let phrases = clean(phrases);
        let aliases = clean(aliases);

        if phrases.is_empty() && aliases.is_empty() {
            return Err(Error::Config("at least one wake phrase is required".to_string()));
        }

        tracing::debug!(?phrases, ?aliases, "wake phrase matcher initialized");
        Ok(Self { phrases, aliases })
    }

    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    #[must_use]
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// The phrase or alias found in `transcript`, if any
    #[must_use]
    pub fn matches(&self, transcript: &str) -> Option<&str> {
        let normalized = normalize(transcript);
        if normalized.is_empty() {
            return None;
        }

        if let Some(phrase) = self.phrases.iter().find(|p| normalized.contains(p.as_str())) {
            return Some(phrase.as_str());
        }

        normalized.split_whitespace().find_map(|token| {
            self.aliases
                .iter()
                .find(|alias| token.contains(alias.as_str()))
                .map(String::as_str)
        })
    }
}

/// A wake phrase was heard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeDetection {
    pub phrase: String,
    pub transcript: String,
}

/// Observable monitor state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorState {
    /// The listen loop should keep restarting
    pub running: bool,
    /// Temporarily suspended; does not clear `running`
    pub paused: bool,
    pub last_heard_transcript: String,
}

impl MonitorState {
    const fn wants_input(&self) -> bool {
        self.running && !self.paused
    }
}

struct LiveListen {
    epoch: u64,
    control: RecognitionControl,
    claim: InputClaim,
}

struct Shared {
    matcher: WakePhraseMatcher,
    recognizer: Arc<dyn SpeechRecognizer>,
    audio: AudioSession,
    cue: Arc<dyn WakeCue>,
    restart_delay: Duration,
    state: watch::Sender<MonitorState>,
    live: Mutex<Option<LiveListen>>,
    detections: mpsc::UnboundedSender<WakeDetection>,
    epoch: AtomicU64,
}

impl Shared {
    fn live(&self) -> MutexGuard<'_, Option<LiveListen>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the microphone; with `epoch`, only if that supervisor holds it
    fn release(&self, epoch: Option<u64>) {
        let taken = {
            let mut live = self.live();
            match (live.as_ref(), epoch) {
                (Some(held), Some(e)) if held.epoch != e => None,
                _ => live.take(),
            }
        };
        if let Some(LiveListen { control, claim, .. }) = taken {
            control.stop();
            drop(claim);
            tracing::debug!("wake monitor released microphone");
        }
    }

    /// Claim input and start continuous recognition if still wanted
    fn engage(
        &self,
        epoch: u64,
        token: &CancellationToken,
    ) -> Result<Option<mpsc::UnboundedReceiver<RecognitionEvent>>> {
        let mut live = self.live();
        if token.is_cancelled() || !self.state.borrow().wants_input() {
            return Ok(None);
        }
        if live.is_some() {
            return Ok(None);
        }

        let claim = self.audio.claim_input(InputOwner::WakeMonitor)?;
        let (events, control) = self.recognizer.start(RecognitionMode::Continuous)?.into_parts();
        *live = Some(LiveListen {
            epoch,
            control,
            claim,
        });
        tracing::debug!("wake monitor listening");
        Ok(Some(events))
    }
}

enum ListenEnd {
    Shutdown,
    Suspended,
    EngineFailed(RecognitionError),
    EngineCancelled,
}

/// Continuous wake phrase listener
pub struct WakePhraseMonitor {
    shared: Arc<Shared>,
    supervisor: Option<(CancellationToken, JoinHandle<()>)>,
}

impl WakePhraseMonitor {
    /// Create a stopped monitor and the receiver for its detections
    #[must_use]
    pub fn new(
        matcher: WakePhraseMatcher,
        recognizer: Arc<dyn SpeechRecognizer>,
        audio: AudioSession,
        cue: Arc<dyn WakeCue>,
        restart_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<WakeDetection>) {
        let (detections, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(MonitorState::default());
        let monitor = Self {
            shared: Arc::new(Shared {
                matcher,
                recognizer,
                audio,
                cue,
                restart_delay,
                state,
                live: Mutex::new(None),
                detections,
                epoch: AtomicU64::new(0),
            }),
            supervisor: None,
        };
        (monitor, rx)
    }

    /// Begin continuous listening
    ///
    /// Resumes instead if already running. Must be called inside a Tokio
    /// runtime.
    pub fn start(&mut self) {
        if self.state().running {
            self.resume();
            return;
        }

        self.shared.state.send_modify(|s| {
            s.running = true;
            s.paused = false;
            s.last_heard_transcript.clear();
        });

        let token = CancellationToken::new();
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = tokio::spawn(supervise(Arc::clone(&self.shared), epoch, token.clone()));
        self.supervisor = Some((token, handle));
        tracing::info!("wake monitor started");
    }

    /// Stop listening and clear `running`; no-op when stopped
    pub fn stop(&mut self) {
        let was_running = self.shared.state.send_if_modified(|s| {
            let changed = s.running || s.paused;
            s.running = false;
            s.paused = false;
            changed
        });
        if let Some((token, _handle)) = self.supervisor.take() {
            token.cancel();
        }
        self.shared.release(None);
        if was_running {
            tracing::info!("wake monitor stopped");
        }
    }

    /// Suspend audio input, keeping `running`
    pub fn pause(&self) {
        let paused = self.shared.state.send_if_modified(|s| {
            if s.running && !s.paused {
                s.paused = true;
                true
            } else {
                false
            }
        });
        self.shared.release(None);
        if paused {
            tracing::debug!("wake monitor paused");
        }
    }

    /// Re-engage audio input if running; no-op otherwise
    pub fn resume(&self) {
        let resumed = self.shared.state.send_if_modified(|s| {
            if s.running {
                s.paused = false;
                true
            } else {
                false
            }
        });
        if resumed {
            tracing::debug!("wake monitor resumed");
        }
    }

    #[must_use]
    pub fn state(&self) -> MonitorState {
        self.shared.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.shared.state.subscribe()
    }

    /// Whether the microphone is currently held by the monitor
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.shared.live().is_some()
    }

    #[must_use]
    pub fn matcher(&self) -> &WakePhraseMatcher {
        &self.shared.matcher
    }
}

impl Drop for WakePhraseMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn supervise(shared: Arc<Shared>, epoch: u64, token: CancellationToken) {
    let mut state_rx = shared.state.subscribe();

    loop {
        // Wait until input is wanted
        loop {
            if state_rx.borrow_and_update().wants_input() {
                break;
            }
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        let events = match shared.engage(epoch, &token) {
            Ok(Some(events)) => events,
            Ok(None) => {
                if token.is_cancelled() {
                    return;
                }
                // State changed under us or the slot is taken; wait for the next change
                tokio::select! {
                    biased;
                    () = token.cancelled() => return,
                    _ = state_rx.changed() => {}
                }
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "wake monitor could not start listening");
                if !restart_after_delay(&shared, &token).await {
                    return;
                }
                continue;
            }
        };

        match listen(&shared, epoch, &token, &mut state_rx, events).await {
            ListenEnd::Shutdown => return,
            ListenEnd::Suspended => {}
            ListenEnd::EngineFailed(error) => {
                tracing::warn!(%error, "wake monitor engine error, restarting");
                if !restart_after_delay(&shared, &token).await {
                    return;
                }
            }
            ListenEnd::EngineCancelled => {
                tracing::debug!("wake monitor recognition cancelled, waiting for resume");
                tokio::select! {
                    biased;
                    () = token.cancelled() => return,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Sleep for the restart delay; false if shut down meanwhile
async fn restart_after_delay(shared: &Shared, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        () = tokio::time::sleep(shared.restart_delay) => shared.state.borrow().running,
    }
}

async fn listen(
    shared: &Shared,
    epoch: u64,
    token: &CancellationToken,
    state_rx: &mut watch::Receiver<MonitorState>,
    mut events: mpsc::UnboundedReceiver<RecognitionEvent>,
) -> ListenEnd {
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => return ListenEnd::Shutdown,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return ListenEnd::Shutdown;
                }
                if !state_rx.borrow_and_update().wants_input() {
                    shared.release(Some(epoch));
                    return ListenEnd::Suspended;
                }
            }
            event = events.recv() => match event {
                Some(
                    RecognitionEvent::Partial(transcript) | RecognitionEvent::Final(transcript),
                ) => {
                    if let Some(end) = hear(shared, epoch, token, transcript) {
                        return end;
                    }
                }
                Some(RecognitionEvent::Failed(error)) => {
                    shared.release(Some(epoch));
                    return if error.is_cancellation() {
                        ListenEnd::EngineCancelled
                    } else {
                        ListenEnd::EngineFailed(error)
                    };
                }
                None => {
                    shared.release(Some(epoch));
                    return ListenEnd::EngineFailed(RecognitionError::Engine(
                        "recognition ended unexpectedly".to_string(),
                    ));
                }
            },
        }
    }
}

fn hear(
    shared: &Shared,
    epoch: u64,
    token: &CancellationToken,
    transcript: String,
) -> Option<ListenEnd> {
    let Some(phrase) = shared.matcher.matches(&transcript).map(ToString::to_string) else {
        shared.state.send_if_modified(|s| {
            if s.last_heard_transcript == transcript {
                false
            } else {
                s.last_heard_transcript.clone_from(&transcript);
                true
            }
        });
        return None;
    };

    if token.is_cancelled() {
        return Some(ListenEnd::Shutdown);
    }

    shared.state.send_modify(|s| {
        s.paused = true;
        s.last_heard_transcript.clear();
    });
    shared.release(Some(epoch));
    match shared.audio.configure_output() {
        Ok(()) => shared.cue.acknowledge(),
        Err(e) => tracing::warn!(error = %e, "skipping wake cue"),
    }

    tracing::info!(phrase = %phrase, transcript = %transcript, "wake phrase detected");
    let _ = shared.detections.send(WakeDetection { phrase, transcript });
    Some(ListenEnd::Suspended)
}
