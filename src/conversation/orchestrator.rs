//! Conversation orchestrator
//!
//! A single actor task owns the conversation state. Commands from the
//! handle and events from the wake monitor, speech capture, synthesis queue,
//! dictionary and recovery timer all arrive through one mailbox, so state is
//! only ever touched from that task.
//!
//! Each state entry bumps a generation counter and replaces a cancellation
//! scope. Background work spawned on behalf of a state carries the
//! generation it was started in; results tagged with an older generation are
//! dropped, and the scope cancels the work itself on exit. The "speech
//! finished" continuation is a single slot cleared at every transition and
//! taken before it runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::state::{ConversationSnapshot, ConversationState, Transition};
use super::word::extract_word;
use crate::db::{WordRecord, WordStore};
use crate::dictionary::DictionaryLookup;
use crate::permission::{Authorization, PermissionGate};
use crate::voice::{
    CaptureEvent, CaptureHandle, CaptureOutcome, CaptureSession, SynthesisEvent, SynthesisQueue,
    UtteranceId, WakeDetection, WakePhraseMonitor,
};
use crate::{Error, Result};

/// Tunables for the conversation
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Speaking rate passed to synthesis (1.0 is normal)
    pub speech_rate: f32,
    pub voice: Option<String>,
    /// Prompt for a manually started turn
    pub manual_prompt: String,
    /// Prompt after the wake phrase
    pub wake_prompt: String,
    /// Spoken before the error message when a turn fails
    pub apology: String,
    /// Pause between the apology and the error message
    pub sequence_pause: Duration,
    /// How long `Failed` lasts once the apology has been spoken
    pub failure_recovery: Duration,
    /// Phrase shown in the idle status line
    pub wake_phrase_label: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            speech_rate: 1.0,
            voice: None,
            manual_prompt: "What word would you like to look up?".to_string(),
            wake_prompt: "Yes?".to_string(),
            apology: "Sorry.".to_string(),
            sequence_pause: Duration::from_millis(300),
            failure_recovery: Duration::from_secs(3),
            wake_phrase_label: "hey wordy".to_string(),
        }
    }
}

/// Subsystems the orchestrator drives
pub struct Collaborators {
    pub monitor: WakePhraseMonitor,
    pub wake_detections: mpsc::UnboundedReceiver<WakeDetection>,
    pub capture: CaptureSession,
    pub synthesis: SynthesisQueue,
    pub dictionary: Arc<dyn DictionaryLookup>,
    pub store: Arc<dyn WordStore>,
    pub permissions: PermissionGate,
}

#[derive(Debug)]
enum Command {
    EnableWakeWord,
    DisableWakeWord,
    Start,
    Cancel,
    Reset,
    Shutdown,
}

enum Input {
    Command(Command),
    WakePhrase(WakeDetection),
    Speech(SynthesisEvent),
    Authorization(Authorization),
    CapturePartial {
        generation: u64,
        transcript: String,
    },
    CaptureResolved {
        generation: u64,
        outcome: CaptureOutcome,
    },
    LookupResolved {
        generation: u64,
        word: String,
        result: Result<String>,
    },
    RecoveryElapsed {
        generation: u64,
    },
}

type Mailbox = mpsc::WeakUnboundedSender<Input>;

fn post(mailbox: &Mailbox, input: Input) -> bool {
    mailbox.upgrade().is_some_and(|tx| tx.send(input).is_ok())
}

/// What to do when the tracked utterance finishes
enum AfterSpeech {
    BeginCapture,
    BeginLookup(String),
    Persist { word: String, definition: String },
    ScheduleRecovery,
}

/// Handle to the running conversation
#[derive(Clone)]
pub struct Orchestrator {
    inbox: mpsc::UnboundedSender<Input>,
    snapshot: watch::Receiver<ConversationSnapshot>,
    transitions: broadcast::Sender<Transition>,
}

impl Orchestrator {
    /// Spawn the conversation actor
    ///
    /// Must be called inside a Tokio runtime. The actor exits on
    /// [`Orchestrator::shutdown`] or once every handle is dropped.
    #[must_use]
    pub fn spawn(
        collaborators: Collaborators,
        settings: OrchestratorSettings,
    ) -> (Self, JoinHandle<()>) {
        let Collaborators {
            monitor,
            wake_detections,
            capture,
            synthesis,
            dictionary,
            store,
            permissions,
        } = collaborators;

        let (inbox, rx) = mpsc::unbounded_channel();
        let mailbox = inbox.downgrade();
        let (transitions, _) = broadcast::channel(64);

        let mut actor = Actor {
            monitor,
            capture,
            synthesis,
            dictionary,
            store,
            permissions,
            settings,
            state: ConversationState::Idle,
            wake_word_mode: false,
            captured_word: None,
            partial_transcript: String::new(),
            generation: 0,
            scope: CancellationToken::new(),
            on_speech_finished: None,
            mailbox,
            snapshot: watch::Sender::new(ConversationSnapshot::default()),
            transitions: transitions.clone(),
        };
        actor.publish();
        let snapshot = actor.snapshot.subscribe();

        actor.forward_wake_detections(wake_detections);
        actor.forward_synthesis_events();
        actor.forward_authorization();

        let handle = tokio::spawn(actor.run(rx));

        (
            Self {
                inbox,
                snapshot,
                transitions,
            },
            handle,
        )
    }

    fn send(&self, command: Command) {
        if self.inbox.send(Input::Command(command)).is_err() {
            tracing::debug!("conversation actor has exited");
        }
    }

    pub fn enable_wake_word_mode(&self) {
        self.send(Command::EnableWakeWord);
    }

    pub fn disable_wake_word_mode(&self) {
        self.send(Command::DisableWakeWord);
    }

    /// Begin a turn by prompting for a word
    pub fn start_conversation(&self) {
        self.send(Command::Start);
    }

    /// Abandon the current turn
    pub fn cancel_conversation(&self) {
        self.send(Command::Cancel);
    }

    /// Cancel everything and restart the wake monitor from scratch
    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    #[must_use]
    pub fn current_state(&self) -> ConversationState {
        self.snapshot.borrow().state.clone()
    }

    #[must_use]
    pub fn status_message(&self) -> String {
        self.snapshot.borrow().status_message.clone()
    }

    #[must_use]
    pub fn captured_word(&self) -> Option<String> {
        self.snapshot.borrow().captured_word.clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> ConversationSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Observe every published snapshot
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.snapshot.clone()
    }

    /// Observe state changes in order
    #[must_use]
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }
}

struct Actor {
    monitor: WakePhraseMonitor,
    capture: CaptureSession,
    synthesis: SynthesisQueue,
    dictionary: Arc<dyn DictionaryLookup>,
    store: Arc<dyn WordStore>,
    permissions: PermissionGate,
    settings: OrchestratorSettings,

    state: ConversationState,
    wake_word_mode: bool,
    captured_word: Option<String>,
    partial_transcript: String,

    generation: u64,
    scope: CancellationToken,
    on_speech_finished: Option<(UtteranceId, AfterSpeech)>,

    mailbox: Mailbox,
    snapshot: watch::Sender<ConversationSnapshot>,
    transitions: broadcast::Sender<Transition>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        tracing::debug!("conversation actor started");

        while let Some(input) = rx.recv().await {
            if matches!(input, Input::Command(Command::Shutdown)) {
                break;
            }
            self.handle(input);
        }

        self.scope.cancel();
        self.capture.cancel();
        self.synthesis.stop();
        self.monitor.stop();
        tracing::info!("conversation stopped");
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Command(command) => self.on_command(command),
            Input::WakePhrase(detection) => self.on_wake_phrase(&detection),
            Input::Speech(event) => self.on_speech(event),
            Input::Authorization(status) => self.on_authorization(status),
            Input::CapturePartial {
                generation,
                transcript,
            } => {
                if self.is_current(generation) && self.state == ConversationState::AwaitingWord {
                    self.partial_transcript = transcript;
                    self.publish();
                }
            }
            Input::CaptureResolved {
                generation,
                outcome,
            } => {
                if self.is_current(generation) && self.state == ConversationState::AwaitingWord {
                    self.on_capture(outcome);
                }
            }
            Input::LookupResolved {
                generation,
                word,
                result,
            } => {
                if self.is_current(generation)
                    && matches!(self.state, ConversationState::LookingUpWord(_))
                {
                    self.on_lookup(word, result);
                }
            }
            Input::RecoveryElapsed { generation } => {
                if self.is_current(generation)
                    && matches!(self.state, ConversationState::Failed(_))
                {
                    self.synthesis.stop();
                    self.go_idle();
                }
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        if generation == self.generation {
            true
        } else {
            tracing::trace!(generation, current = self.generation, "dropping stale event");
            false
        }
    }

    fn on_command(&mut self, command: Command) {
        tracing::debug!(?command, state = self.state.name(), "conversation command");

        match command {
            Command::EnableWakeWord => {
                if !self.permissions.is_authorized() {
                    let at_rest = matches!(
                        self.state,
                        ConversationState::Idle | ConversationState::Failed(_)
                    );
                    if at_rest {
                        self.fail(&Error::PermissionDenied);
                    } else {
                        tracing::debug!(
                            state = self.state.name(),
                            "not enabling wake word mode without authorization"
                        );
                    }
                    return;
                }
                self.wake_word_mode = true;
                if self.state.is_idle() {
                    self.monitor.start();
                }
                tracing::info!("wake word mode enabled");
                self.publish();
            }
            Command::DisableWakeWord => {
                self.wake_word_mode = false;
                self.monitor.stop();
                tracing::info!("wake word mode disabled");
                self.publish();
            }
            Command::Start => {
                if !matches!(self.state, ConversationState::Idle | ConversationState::Failed(_)) {
                    tracing::debug!(state = self.state.name(), "conversation already active");
                    return;
                }
                if !self.permissions.is_authorized() {
                    self.fail(&Error::PermissionDenied);
                    return;
                }
                let prompt = self.settings.manual_prompt.clone();
                self.begin_turn(&prompt);
            }
            Command::Cancel => self.cancel_turn(),
            Command::Reset => self.reset(),
            Command::Shutdown => {}
        }
    }

    fn on_wake_phrase(&mut self, detection: &WakeDetection) {
        if !self.wake_word_mode || !self.state.is_idle() {
            tracing::debug!(
                phrase = %detection.phrase,
                state = self.state.name(),
                "ignoring wake phrase"
            );
            return;
        }
        if !self.permissions.is_authorized() {
            self.fail(&Error::PermissionDenied);
            return;
        }

        tracing::info!(phrase = %detection.phrase, "starting turn from wake phrase");
        let prompt = self.settings.wake_prompt.clone();
        self.begin_turn(&prompt);
    }

    fn on_speech(&mut self, event: SynthesisEvent) {
        let SynthesisEvent::Finished(id) = event else {
            return;
        };
        if self.on_speech_finished.as_ref().map(|(expected, _)| *expected) != Some(id) {
            return;
        }
        let Some((_, next)) = self.on_speech_finished.take() else {
            return;
        };

        match next {
            AfterSpeech::BeginCapture => self.begin_capture(),
            AfterSpeech::BeginLookup(word) => self.begin_lookup(word),
            AfterSpeech::Persist { word, definition } => self.finish_turn(word, definition),
            AfterSpeech::ScheduleRecovery => self.schedule_recovery(),
        }
    }

    fn on_authorization(&mut self, status: Authorization) {
        tracing::info!(%status, "speech authorization changed");

        if status == Authorization::Authorized {
            if self.wake_word_mode && self.state.is_idle() {
                self.monitor.start();
            }
            self.publish();
            return;
        }

        self.monitor.pause();
        if self.state == ConversationState::AwaitingWord {
            self.fail(&Error::PermissionDenied);
        } else {
            self.publish();
        }
    }

    fn begin_turn(&mut self, prompt: &str) {
        self.monitor.pause();
        self.capture.cancel();
        self.captured_word = None;
        self.partial_transcript.clear();

        self.transition(ConversationState::PromptingUser);
        let id = self.speak(prompt);
        self.on_speech_finished = Some((id, AfterSpeech::BeginCapture));
    }

    fn begin_capture(&mut self) {
        if !self.permissions.is_authorized() {
            self.fail(&Error::PermissionDenied);
            return;
        }

        self.monitor.pause();
        self.transition(ConversationState::AwaitingWord);

        match self.capture.start_capture() {
            Ok(handle) => self.watch_capture(handle),
            Err(e) => self.fail(&e),
        }
    }

    fn on_capture(&mut self, outcome: CaptureOutcome) {
        self.capture.cancel();
        self.partial_transcript.clone_from(&outcome.transcript);

        if let Some(error) = outcome.error {
            self.fail(&Error::Recognition(error.to_string()));
            return;
        }

        let Some(word) = extract_word(&outcome.transcript) else {
            self.fail(&Error::EmptyCapture);
            return;
        };

        tracing::info!(word = %word, transcript = %outcome.transcript, "word captured");
        self.captured_word = Some(word.clone());
        self.transition(ConversationState::ConfirmingWord(word.clone()));
        let id = self.speak(&format!("I heard {word}."));
        self.on_speech_finished = Some((id, AfterSpeech::BeginLookup(word)));
    }

    fn begin_lookup(&mut self, word: String) {
        self.transition(ConversationState::LookingUpWord(word.clone()));

        let generation = self.generation;
        let scope = self.scope.clone();
        let mailbox = self.mailbox.clone();
        let dictionary = Arc::clone(&self.dictionary);

        tokio::spawn(async move {
            let result = tokio::select! {
                () = scope.cancelled() => return,
                result = dictionary.lookup(&word) => result,
            };
            post(
                &mailbox,
                Input::LookupResolved {
                    generation,
                    word,
                    result,
                },
            );
        });
    }

    fn on_lookup(&mut self, word: String, result: Result<String>) {
        match result {
            Ok(definition) => {
                let text = format!("The definition of {word} is: {definition}");
                self.transition(ConversationState::SpeakingDefinition {
                    word: word.clone(),
                    definition: definition.clone(),
                });
                let id = self.speak(&text);
                self.on_speech_finished = Some((id, AfterSpeech::Persist { word, definition }));
            }
            Err(e) => self.fail(&e),
        }
    }

    fn finish_turn(&mut self, word: String, definition: String) {
        let record = WordRecord::new(word, definition);
        let store = Arc::clone(&self.store);

        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.save(&record) {
                tracing::warn!(word = %record.word, error = %e, "failed to save word");
            }
        });

        self.captured_word = None;
        self.go_idle();
    }

    fn fail(&mut self, error: &Error) {
        let message = error.to_string();
        tracing::warn!(error = %message, state = self.state.name(), "conversation turn failed");

        self.capture.cancel();
        self.monitor.pause();
        self.transition(ConversationState::Failed(message.clone()));

        let texts = [self.settings.apology.clone(), message];
        let ids = self.synthesis.enqueue_sequence(
            &texts,
            self.settings.speech_rate,
            self.settings.sequence_pause,
        );
        match ids.last() {
            Some(&last) => self.on_speech_finished = Some((last, AfterSpeech::ScheduleRecovery)),
            None => self.schedule_recovery(),
        }
    }

    fn schedule_recovery(&self) {
        let generation = self.generation;
        let scope = self.scope.clone();
        let mailbox = self.mailbox.clone();
        let delay = self.settings.failure_recovery;

        tokio::spawn(async move {
            tokio::select! {
                () = scope.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    post(&mailbox, Input::RecoveryElapsed { generation });
                }
            }
        });
    }

    fn cancel_turn(&mut self) {
        let busy =
            !self.state.is_idle() || self.synthesis.is_speaking() || self.capture.is_active();
        if !busy {
            tracing::debug!("nothing to cancel");
            return;
        }

        self.capture.cancel();
        self.synthesis.stop();
        self.captured_word = None;
        tracing::info!(state = self.state.name(), "conversation cancelled");
        self.go_idle();
    }

    fn reset(&mut self) {
        self.capture.cancel();
        self.synthesis.stop();
        self.monitor.stop();
        self.captured_word = None;
        self.partial_transcript.clear();

        self.transition(ConversationState::Idle);
        if self.wake_word_mode && self.permissions.is_authorized() {
            self.monitor.start();
        }
        tracing::info!("conversation reset");
    }

    fn go_idle(&mut self) {
        self.capture.cancel();
        self.partial_transcript.clear();
        self.transition(ConversationState::Idle);

        if !self.wake_word_mode {
            return;
        }
        if self.permissions.is_authorized() {
            self.monitor.start();
        } else {
            tracing::warn!("not resuming wake monitor without authorization");
        }
    }

    fn speak(&self, text: &str) -> UtteranceId {
        self.synthesis
            .speak(text, self.settings.speech_rate, self.settings.voice.as_deref())
    }

    fn transition(&mut self, next: ConversationState) {
        self.generation += 1;
        self.scope.cancel();
        self.scope = CancellationToken::new();
        self.on_speech_finished = None;

        let previous = std::mem::replace(&mut self.state, next);
        if previous != self.state {
            tracing::info!(
                from = previous.name(),
                to = self.state.name(),
                word = ?self.state.word(),
                "conversation transition"
            );
            let _ = self.transitions.send(Transition {
                from: previous,
                to: self.state.clone(),
            });
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(ConversationSnapshot {
            state: self.state.clone(),
            status_message: self
                .state
                .status_message(self.wake_word_mode, &self.settings.wake_phrase_label),
            captured_word: self.captured_word.clone(),
            wake_word_mode: self.wake_word_mode,
            partial_transcript: self.partial_transcript.clone(),
            authorization: self.permissions.current(),
        });
    }

    fn watch_capture(&self, mut handle: CaptureHandle) {
        let generation = self.generation;
        let scope = self.scope.clone();
        let mailbox = self.mailbox.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    () = scope.cancelled() => return,
                    event = handle.next_event() => event,
                };
                let input = match event {
                    CaptureEvent::Partial(transcript) => Input::CapturePartial {
                        generation,
                        transcript,
                    },
                    CaptureEvent::Finished(outcome) => {
                        post(
                            &mailbox,
                            Input::CaptureResolved {
                                generation,
                                outcome,
                            },
                        );
                        return;
                    }
                    CaptureEvent::Cancelled => return,
                };
                if !post(&mailbox, input) {
                    return;
                }
            }
        });
    }

    fn forward_wake_detections(&self, mut detections: mpsc::UnboundedReceiver<WakeDetection>) {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            while let Some(detection) = detections.recv().await {
                if !post(&mailbox, Input::WakePhrase(detection)) {
                    break;
                }
            }
        });
    }

    fn forward_synthesis_events(&self) {
        let mut events = self.synthesis.subscribe();
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if !post(&mailbox, Input::Speech(event)) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "synthesis events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn forward_authorization(&self) {
        let mut status = self.permissions.subscribe();
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                if !post(&mailbox, Input::Authorization(current)) {
                    break;
                }
            }
        });
    }
}
