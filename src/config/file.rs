//! TOML configuration file loading
//!
//! Supports `~/.config/wordy/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct WordyConfigFile {
    #[serde(default)]
    pub voice: VoiceFileConfig,

    #[serde(default)]
    pub wake: WakeFileConfig,

    #[serde(default)]
    pub capture: CaptureFileConfig,

    #[serde(default)]
    pub conversation: ConversationFileConfig,

    #[serde(default)]
    pub dictionary: DictionaryFileConfig,

    #[serde(default)]
    pub server: ServerFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Speech recognition and synthesis backends
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// "whisper" or "deepgram"
    pub stt_provider: Option<String>,
    pub stt_model: Option<String>,
    pub stt_base_url: Option<String>,

    /// "openai" or "elevenlabs"
    pub tts_provider: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f32>,
    pub tts_base_url: Option<String>,

    /// Force the recognition authorization status instead of probing
    pub authorization: Option<String>,
}

/// Wake phrase monitor
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    pub enabled: Option<bool>,
    pub phrases: Option<Vec<String>>,
    pub aliases: Option<Vec<String>>,
    pub restart_delay_ms: Option<u64>,
    /// Play a chime on detection
    pub cue: Option<bool>,
}

/// One-shot speech capture
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub finalize_delay_ms: Option<u64>,
    pub listen_timeout_ms: Option<u64>,
    pub partial_interval_ms: Option<u64>,
    pub energy_threshold: Option<f32>,
}

/// Conversation pacing
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    pub speech_rate: Option<f32>,
    pub sequence_pause_ms: Option<u64>,
    pub failure_recovery_ms: Option<u64>,
}

/// Dictionary service
#[derive(Debug, Default, Deserialize)]
pub struct DictionaryFileConfig {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub cache_ttl_secs: Option<u64>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Serve the HTTP API
    pub enabled: Option<bool>,
    pub port: Option<u16>,
    pub data_dir: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
}

/// Parse a config file body
///
/// # Errors
///
/// Returns error if the TOML is malformed
pub fn parse(content: &str) -> Result<WordyConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load a config file
///
/// An explicit `path` must exist and parse. Without one the standard path is
/// tried, and a missing or broken file falls back to defaults.
///
/// # Errors
///
/// Returns error if an explicit path cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<WordyConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = parse(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(WordyConfigFile::default());
    };

    if !path.exists() {
        return Ok(WordyConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(WordyConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(WordyConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/wordy/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("wordy").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let fc = parse("").unwrap();
        assert!(fc.voice.stt_provider.is_none());
        assert!(fc.wake.phrases.is_none());
    }

    #[test]
    fn test_sections() {
        let fc = parse(
            r#"
            [wake]
            phrases = ["hey wordy", "okay wordy"]
            restart_delay_ms = 250

            [server]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(fc.wake.phrases.unwrap().len(), 2);
        assert_eq!(fc.wake.restart_delay_ms, Some(250));
        assert_eq!(fc.server.port, Some(9000));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_file(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_explicit_path_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dictionary]\ntimeout_secs = 3\n").unwrap();
        let fc = load_config_file(Some(&path)).unwrap();
        assert_eq!(fc.dictionary.timeout_secs, Some(3));
    }
}
