//! Voice subsystems
//!
//! Audio I/O and cloud STT/TTS at the bottom; on top of them the three
//! long-running subsystems the conversation drives: the wake phrase
//! monitor, one-shot speech capture, and the synthesis queue.

mod audio_session;
mod capture;
mod output;
mod playback;
mod recognizer;
mod segmenter;
mod speech_capture;
mod stt;
mod synthesis;
mod tts;
mod wake_word;

pub use audio_session::{AudioSession, InputClaim, InputOwner, SessionMode};
pub use capture::{MicrophoneTap, SAMPLE_RATE, input_available, samples_to_wav};
pub use output::{CloudSpeechOutput, SilentCue, SpeechOutput, ToneCue, Utterance, WakeCue};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3, tone};
pub use recognizer::{
    CloudRecognizer, RecognitionControl, RecognitionError, RecognitionEvent, RecognitionMode,
    RecognitionTask, SpeechRecognizer,
};
pub use segmenter::{DEFAULT_ENERGY_THRESHOLD, SpeechSegmenter, calculate_energy};
pub use speech_capture::{
    CaptureEvent, CaptureHandle, CaptureOptions, CaptureOutcome, CaptureSession, CaptureState,
    DEFAULT_FINALIZE_DELAY, DEFAULT_LISTEN_TIMEOUT,
};
pub use stt::{SpeechToText, SttProvider};
pub use synthesis::{SynthesisEvent, SynthesisQueue, UtteranceId};
pub use tts::{TextToSpeech, TtsProvider};
pub use wake_word::{
    DEFAULT_RESTART_DELAY, MonitorState, WakeDetection, WakePhraseMatcher, WakePhraseMonitor,
};
