//! Shared audio session handle
//!
//! There is exactly one microphone tap and one output configuration per
//! process. Components receive a clone of [`AudioSession`] and go through an
//! explicit claim/release protocol instead of touching global audio state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{Error, Result};

/// Who currently holds the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOwner {
    WakeMonitor,
    SpeechCapture,
}

impl fmt::Display for InputOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WakeMonitor => f.write_str("wake monitor"),
            Self::SpeechCapture => f.write_str("speech capture"),
        }
    }
}

/// Mode the session was most recently configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Inactive,
    Playback,
    Record,
}

#[derive(Debug)]
struct SessionState {
    input: Option<(u64, InputOwner)>,
    mode: SessionMode,
    next_claim: u64,
}

/// Process-wide audio session
#[derive(Clone)]
pub struct AudioSession {
    state: Arc<Mutex<SessionState>>,
}

impl AudioSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                input: None,
                mode: SessionMode::Inactive,
                next_claim: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the microphone and switch the session to recording
    ///
    /// The claim is released when the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns `EngineStart` if another component already holds the input
    pub fn claim_input(&self, owner: InputOwner) -> Result<InputClaim> {
        let mut state = self.lock();
        if let Some((_, holder)) = state.input {
            return Err(Error::EngineStart(format!(
                "microphone is held by the {holder}"
            )));
        }

        state.next_claim += 1;
        let id = state.next_claim;
        state.input = Some((id, owner));
        state.mode = SessionMode::Record;
        drop(state);

        tracing::debug!(%owner, claim = id, "microphone claimed");
        Ok(InputClaim {
            session: self.clone(),
            id,
            owner,
        })
    }

    /// Configure the session for playback
    ///
    /// Idempotent. Playback may run while the wake monitor is merely paused
    /// or listening, but never on top of an active speech capture.
    ///
    /// # Errors
    ///
    /// Returns `EngineStart` while a speech capture holds the microphone
    pub fn configure_output(&self) -> Result<()> {
        let mut state = self.lock();
        if matches!(state.input, Some((_, InputOwner::SpeechCapture))) {
            return Err(Error::EngineStart(
                "cannot play audio while capturing speech".to_string(),
            ));
        }
        if state.mode != SessionMode::Playback {
            state.mode = SessionMode::Playback;
            tracing::trace!("audio session configured for playback");
        }
        Ok(())
    }

    #[must_use]
    pub fn input_owner(&self) -> Option<InputOwner> {
        self.lock().input.map(|(_, owner)| owner)
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.lock().mode
    }

    fn release(&self, id: u64) {
        let mut state = self.lock();
        if state.input.is_some_and(|(held, _)| held == id) {
            state.input = None;
            if state.mode == SessionMode::Record {
                state.mode = SessionMode::Inactive;
            }
            tracing::debug!(claim = id, "microphone released");
        }
    }
}

impl Default for AudioSession {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AudioSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("AudioSession")
            .field("input", &state.input.map(|(_, owner)| owner))
            .field("mode", &state.mode)
            .finish()
    }
}

/// Exclusive microphone claim, released on drop
pub struct InputClaim {
    session: AudioSession,
    id: u64,
    owner: InputOwner,
}

impl Drop for InputClaim {
    fn drop(&mut self) {
        self.session.release(self.id);
    }
}

impl fmt::Debug for InputClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputClaim")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_is_exclusive() {
        let session = AudioSession::new();
        let claim = session.claim_input(InputOwner::WakeMonitor).unwrap();
        assert_eq!(session.input_owner(), Some(InputOwner::WakeMonitor));
        assert_eq!(session.mode(), SessionMode::Record);

        let err = session.claim_input(InputOwner::SpeechCapture).unwrap_err();
        assert!(matches!(err, Error::EngineStart(_)));

        drop(claim);
        assert_eq!(session.input_owner(), None);
        assert!(session.claim_input(InputOwner::SpeechCapture).is_ok());
    }

    #[test]
    fn test_output_refused_during_capture() {
        let session = AudioSession::new();
        session.configure_output().unwrap();
        session.configure_output().unwrap();
        assert_eq!(session.mode(), SessionMode::Playback);

        let claim = session.claim_input(InputOwner::SpeechCapture).unwrap();
        assert!(session.configure_output().is_err());
        drop(claim);
        assert!(session.configure_output().is_ok());
    }

    #[test]
    fn test_output_allowed_while_monitor_listens() {
        let session = AudioSession::new();
        let _claim = session.claim_input(InputOwner::WakeMonitor).unwrap();
        assert!(session.configure_output().is_ok());
    }

    #[test]
    fn test_stale_release_is_ignored() {
        let session = AudioSession::new();
        let first = session.claim_input(InputOwner::WakeMonitor).unwrap();
        let stale_id = first.id;
        drop(first);

        let _second = session.claim_input(InputOwner::SpeechCapture).unwrap();
        session.release(stale_id);
        assert_eq!(session.input_owner(), Some(InputOwner::SpeechCapture));
    }
}
