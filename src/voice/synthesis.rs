//! Speech synthesis queue
//!
//! Holds at most one in-flight utterance. `speak` pre-empts whatever is
//! playing; `enqueue_sequence` replaces the queue with an ordered list that
//! advances off each `Finished` event, with a pause between items.
//!
//! Every started utterance ends with exactly one of `Finished` or
//! `Cancelled`. Backend failures are logged and reported as `Finished` so a
//! listener waiting on an utterance is never left hanging.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::audio_session::AudioSession;
use super::output::{SpeechOutput, Utterance};
use crate::{Error, Result};

/// Identifier assigned to each submitted utterance
pub type UtteranceId = u64;

/// Lifecycle event of an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisEvent {
    Started(UtteranceId),
    Finished(UtteranceId),
    Cancelled(UtteranceId),
}

struct Queued {
    id: UtteranceId,
    utterance: Utterance,
}

struct InFlight {
    id: UtteranceId,
    token: CancellationToken,
}

struct QueueState {
    current: Option<InFlight>,
    pending: VecDeque<Queued>,
    pause_between: Duration,
    next_id: UtteranceId,
}

struct Inner {
    output: Arc<dyn SpeechOutput>,
    audio: AudioSession,
    events: broadcast::Sender<SynthesisEvent>,
    state: Mutex<QueueState>,
}

/// Sequential speech synthesis with pre-emption
#[derive(Clone)]
pub struct SynthesisQueue {
    inner: Arc<Inner>,
}

impl SynthesisQueue {
    #[must_use]
    pub fn new(output: Arc<dyn SpeechOutput>, audio: AudioSession) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                output,
                audio,
                events,
                state: Mutex::new(QueueState {
                    current: None,
                    pending: VecDeque::new(),
                    pause_between: Duration::ZERO,
                    next_id: 1,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to utterance events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SynthesisEvent> {
        self.inner.events.subscribe()
    }

    /// Interrupt everything and speak `text` now
    ///
    /// Must be called inside a Tokio runtime.
    pub fn speak(&self, text: &str, rate: f32, voice: Option<&str>) -> UtteranceId {
        let mut state = self.lock();
        self.cancel_locked(&mut state);
        state.pause_between = Duration::ZERO;

        let id = next_id(&mut state);
        let utterance = Utterance::new(text, rate).with_voice(voice.map(ToString::to_string));
        self.launch_locked(&mut state, Queued { id, utterance }, Duration::ZERO);
        id
    }

    /// Replace the queue with `texts`, spoken in order with `pause` between
    ///
    /// Must be called inside a Tokio runtime.
    pub fn enqueue_sequence<S: AsRef<str>>(
        &self,
        texts: &[S],
        rate: f32,
        pause: Duration,
    ) -> Vec<UtteranceId> {
        let mut state = self.lock();
        self.cancel_locked(&mut state);
        state.pause_between = pause;

        let mut ids = Vec::with_capacity(texts.len());
        for text in texts {
            let id = next_id(&mut state);
            ids.push(id);
            state.pending.push_back(Queued {
                id,
                utterance: Utterance::new(text.as_ref(), rate),
            });
        }

        if let Some(first) = state.pending.pop_front() {
            self.launch_locked(&mut state, first, Duration::ZERO);
        }
        ids
    }

    /// Cancel the current utterance and empty the queue
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.current.is_some() || !state.pending.is_empty() {
            tracing::debug!("synthesis stopped");
        }
        self.cancel_locked(&mut state);
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        let state = self.lock();
        state.current.is_some() || !state.pending.is_empty()
    }

    /// Speak `texts` in order and wait until the last one finishes
    ///
    /// # Errors
    ///
    /// Returns `SynthesisInterrupted` if any item is pre-empted
    pub async fn speak_sequence_and_wait<S: AsRef<str>>(
        &self,
        texts: &[S],
        rate: f32,
        pause: Duration,
    ) -> Result<()> {
        let mut events = self.subscribe();
        let ids = self.enqueue_sequence(texts, rate, pause);
        let Some(&last) = ids.last() else {
            return Ok(());
        };

        loop {
            match events.recv().await {
                Ok(SynthesisEvent::Finished(id)) if id == last => return Ok(()),
                Ok(SynthesisEvent::Cancelled(id)) if ids.contains(&id) => {
                    return Err(Error::SynthesisInterrupted);
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::SynthesisInterrupted);
                }
            }
        }
    }

    fn cancel_locked(&self, state: &mut QueueState) {
        state.pending.clear();
        if let Some(current) = state.current.take() {
            current.token.cancel();
            let _ = self.inner.events.send(SynthesisEvent::Cancelled(current.id));
            tracing::debug!(id = current.id, "utterance cancelled");
        }
    }

    fn launch_locked(&self, state: &mut QueueState, item: Queued, delay: Duration) {
        let token = CancellationToken::new();
        state.current = Some(InFlight {
            id: item.id,
            token: token.clone(),
        });

        let queue = self.clone();
        tokio::spawn(async move {
            queue.run_utterance(item, delay, token).await;
        });
    }

    async fn run_utterance(self, item: Queued, delay: Duration, token: CancellationToken) {
        if !delay.is_zero() {
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }

        {
            let _state = self.lock();
            if token.is_cancelled() {
                return;
            }
            let _ = self.inner.events.send(SynthesisEvent::Started(item.id));
        }
        tracing::debug!(id = item.id, text = %item.utterance.text, "utterance started");

        match self.inner.audio.configure_output() {
            Ok(()) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => return,
                    result = self.inner.output.say(&item.utterance) => {
                        if let Err(e) = result {
                            tracing::warn!(id = item.id, error = %e, "speech output failed");
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    id = item.id,
                    error = %e,
                    "audio output unavailable, skipping utterance"
                );
            }
        }

        self.complete(item.id);
    }

    fn complete(&self, id: UtteranceId) {
        let mut state = self.lock();
        if state.current.as_ref().map(|c| c.id) != Some(id) {
            return;
        }
        state.current = None;
        let _ = self.inner.events.send(SynthesisEvent::Finished(id));
        tracing::debug!(id, "utterance finished");

        if let Some(next) = state.pending.pop_front() {
            let pause = state.pause_between;
            self.launch_locked(&mut state, next, pause);
        }
    }
}

const fn next_id(state: &mut QueueState) -> UtteranceId {
    let id = state.next_id;
    state.next_id += 1;
    id
}
