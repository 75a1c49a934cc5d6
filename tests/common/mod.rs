//! Shared test utilities
//!
//! Scripted stand-ins for the recognizer, speech output, dictionary and
//! word store so conversations can run without audio hardware or network.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use wordy_voice::conversation::{
    Collaborators, ConversationSnapshot, ConversationState, Orchestrator, OrchestratorSettings,
};
use wordy_voice::voice::{
    AudioSession, CaptureOptions, CaptureSession, RecognitionControl, RecognitionError,
    RecognitionEvent, RecognitionMode, RecognitionTask, SpeechOutput, SpeechRecognizer,
    SynthesisQueue, Utterance, WakeCue, WakePhraseMatcher, WakePhraseMonitor,
};
use wordy_voice::{
    Authorization, DbPool, DictionaryLookup, Error, PermissionGate, Result, WordRecord,
    WordStore, db,
};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// One step of a recognition script
#[derive(Debug, Clone)]
pub enum Step {
    Wait(Duration),
    Partial(&'static str),
    Final(&'static str),
    Fail(RecognitionError),
}

/// Recognizer that plays back canned scripts
///
/// Each `start` takes the next script for its mode. Once a script runs out
/// the task stays open and silent until stopped.
#[derive(Default)]
pub struct ScriptedRecognizer {
    continuous: Mutex<VecDeque<Vec<Step>>>,
    one_shot: Mutex<VecDeque<Vec<Step>>>,
    continuous_starts: AtomicUsize,
    one_shot_starts: AtomicUsize,
    stops: Arc<AtomicUsize>,
    fail_start: Mutex<bool>,
}

impl ScriptedRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_continuous(&self, script: Vec<Step>) {
        self.continuous.lock().unwrap().push_back(script);
    }

    pub fn push_one_shot(&self, script: Vec<Step>) {
        self.one_shot.lock().unwrap().push_back(script);
    }

    pub fn fail_next_start(&self) {
        *self.fail_start.lock().unwrap() = true;
    }

    pub fn starts(&self, mode: RecognitionMode) -> usize {
        match mode {
            RecognitionMode::Continuous => self.continuous_starts.load(Ordering::SeqCst),
            RecognitionMode::OneShot => self.one_shot_starts.load(Ordering::SeqCst),
        }
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn start(&self, mode: RecognitionMode) -> Result<RecognitionTask> {
        {
            let mut fail = self.fail_start.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(Error::EngineStart("scripted start failure".to_string()));
            }
        }

        let script = match mode {
            RecognitionMode::Continuous => {
                self.continuous_starts.fetch_add(1, Ordering::SeqCst);
                self.continuous.lock().unwrap().pop_front()
            }
            RecognitionMode::OneShot => {
                self.one_shot_starts.fetch_add(1, Ordering::SeqCst);
                self.one_shot.lock().unwrap().pop_front()
            }
        }
        .unwrap_or_default();

        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let task_token = token.clone();

        tokio::spawn(async move {
            for step in script {
                if task_token.is_cancelled() {
                    return;
                }
                let event = match step {
                    Step::Wait(duration) => {
                        let cancelled = tokio::select! {
                            () = task_token.cancelled() => true,
                            () = tokio::time::sleep(duration) => false,
                        };
                        if cancelled {
                            return;
                        }
                        continue;
                    }
                    Step::Partial(text) => RecognitionEvent::Partial(text.to_string()),
                    Step::Final(text) => RecognitionEvent::Final(text.to_string()),
                    Step::Fail(error) => RecognitionEvent::Failed(error),
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            task_token.cancelled().await;
        });

        let stops = Arc::clone(&self.stops);
        let control = RecognitionControl::new(move || {
            token.cancel();
            stops.fetch_add(1, Ordering::SeqCst);
        });

        Ok(RecognitionTask::new(rx, control))
    }
}

/// Speech output that records text and takes a fixed time per utterance
pub struct ScriptedOutput {
    spoken: Mutex<Vec<String>>,
    duration: Duration,
}

impl ScriptedOutput {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            duration,
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechOutput for ScriptedOutput {
    async fn say(&self, utterance: &Utterance) -> Result<()> {
        self.spoken.lock().unwrap().push(utterance.text.clone());
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Wake cue that counts acknowledgements
#[derive(Default)]
pub struct CountingCue {
    count: AtomicUsize,
}

impl CountingCue {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl WakeCue for CountingCue {
    fn acknowledge(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Dictionary backed by a map; unknown words are not found
#[derive(Default)]
pub struct FakeDictionary {
    entries: HashMap<String, String>,
    unreachable: bool,
    lookups: AtomicUsize,
}

impl FakeDictionary {
    pub fn with(entries: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            entries: entries
                .iter()
                .map(|(w, d)| ((*w).to_string(), (*d).to_string()))
                .collect(),
            ..Self::default()
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            unreachable: true,
            ..Self::default()
        })
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DictionaryLookup for FakeDictionary {
    async fn lookup(&self, word: &str) -> Result<String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.unreachable {
            return Err(Error::LookupTransport("could not connect".to_string()));
        }
        self.entries
            .get(word)
            .cloned()
            .ok_or_else(|| Error::LookupNotFound(word.to_string()))
    }
}

/// Word store that keeps records in memory
pub struct MemoryStore {
    saved: watch::Sender<Vec<WordRecord>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            saved: watch::Sender::new(Vec::new()),
        })
    }

    pub fn records(&self) -> Vec<WordRecord> {
        self.saved.borrow().clone()
    }

    /// Wait until at least `n` records have been saved
    pub async fn wait_for(&self, n: usize) -> Vec<WordRecord> {
        let mut rx = self.saved.subscribe();
        let records = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|r| r.len() >= n))
            .await
            .expect("timed out waiting for saved records")
            .expect("store dropped");
        records.clone()
    }
}

impl WordStore for MemoryStore {
    fn save(&self, record: &WordRecord) -> Result<()> {
        self.saved.send_modify(|records| records.push(record.clone()));
        Ok(())
    }
}

/// Tunables for a test conversation
pub struct HarnessOptions {
    pub authorization: Authorization,
    pub speech_duration: Duration,
    pub capture: CaptureOptions,
    pub failure_recovery: Duration,
    pub restart_delay: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            authorization: Authorization::Authorized,
            speech_duration: Duration::from_millis(100),
            capture: CaptureOptions {
                finalize_after_first_result: Duration::from_millis(1500),
                listen_timeout: Duration::from_secs(5),
            },
            failure_recovery: Duration::from_secs(1),
            restart_delay: Duration::from_millis(500),
        }
    }
}

/// A running orchestrator wired to fakes
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub recognizer: Arc<ScriptedRecognizer>,
    pub output: Arc<ScriptedOutput>,
    pub store: Arc<MemoryStore>,
    pub cue: Arc<CountingCue>,
    pub permissions: PermissionGate,
    pub audio: AudioSession,
    pub actor: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub fn start(
        recognizer: Arc<ScriptedRecognizer>,
        dictionary: Arc<dyn DictionaryLookup>,
        options: HarnessOptions,
    ) -> Self {
        let audio = AudioSession::new();
        let output = ScriptedOutput::new(options.speech_duration);
        let store = MemoryStore::new();
        let cue = Arc::new(CountingCue::default());
        let permissions = PermissionGate::new(options.authorization);

        let matcher =
            WakePhraseMatcher::new(vec!["hey wordy".to_string()], vec!["wordy".to_string()])
                .unwrap();
        let (monitor, wake_detections) = WakePhraseMonitor::new(
            matcher,
            recognizer.clone(),
            audio.clone(),
            cue.clone(),
            options.restart_delay,
        );
        let capture = CaptureSession::new(recognizer.clone(), audio.clone(), options.capture);
        let synthesis = SynthesisQueue::new(output.clone(), audio.clone());

        let collaborators = Collaborators {
            monitor,
            wake_detections,
            capture,
            synthesis,
            dictionary,
            store: store.clone(),
            permissions: permissions.clone(),
        };
        let settings = OrchestratorSettings {
            failure_recovery: options.failure_recovery,
            sequence_pause: Duration::from_millis(50),
            ..OrchestratorSettings::default()
        };

        let (orchestrator, actor) = Orchestrator::spawn(collaborators, settings);

        Self {
            orchestrator,
            recognizer,
            output,
            store,
            cue,
            permissions,
            audio,
            actor,
        }
    }

    /// Wait for a snapshot matching `pred`
    pub async fn wait_until(
        &self,
        pred: impl FnMut(&ConversationSnapshot) -> bool,
    ) -> ConversationSnapshot {
        let mut rx = self.orchestrator.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(pred))
            .await
            .expect("timed out waiting for conversation state")
            .expect("orchestrator dropped");
        snapshot.clone()
    }
}

/// Collect transition targets until the conversation is back at Idle
pub async fn collect_until_idle(
    transitions: &mut tokio::sync::broadcast::Receiver<wordy_voice::conversation::Transition>,
) -> Vec<ConversationState> {
    let mut seen = Vec::new();
    loop {
        let transition = tokio::time::timeout(Duration::from_secs(60), transitions.recv())
            .await
            .expect("timed out waiting for transition")
            .expect("transition channel closed");
        let done = transition.to.is_idle();
        seen.push(transition.to);
        if done {
            return seen;
        }
    }
}
