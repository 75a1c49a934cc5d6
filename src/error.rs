//! Error types for Wordy

use thiserror::Error;

/// Result type alias for Wordy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Wordy
///
/// Messages of the conversation-facing variants are spoken aloud when a turn
/// fails, so they are phrased as short sentences rather than diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Speech recognition is not authorized
    #[error("speech recognition not authorized")]
    PermissionDenied,

    /// Audio hardware or session could not be activated
    #[error("could not start listening: {0}")]
    EngineStart(String),

    /// Recognition engine failed mid-capture
    #[error("speech recognition failed: {0}")]
    Recognition(String),

    /// Nothing intelligible was heard
    #[error("I didn't catch a word")]
    EmptyCapture,

    /// Dictionary has no entry for the word
    #[error("no definition found for {0}")]
    LookupNotFound(String),

    /// Dictionary could not be reached or answered badly
    #[error("the dictionary could not be reached: {0}")]
    LookupTransport(String),

    /// Utterance pre-empted by a newer one
    #[error("speech interrupted")]
    SynthesisInterrupted,

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_message_is_fixed() {
        assert_eq!(
            Error::PermissionDenied.to_string(),
            "speech recognition not authorized"
        );
    }

    #[test]
    fn test_lookup_variants() {
        let not_found = Error::LookupNotFound("zzyzx".to_string());
        assert_eq!(not_found.to_string(), "no definition found for zzyzx");
        assert_eq!(
            Error::LookupTransport("timeout".to_string()).to_string(),
            "the dictionary could not be reached: timeout"
        );
    }
}
