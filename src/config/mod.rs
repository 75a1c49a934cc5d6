//! Configuration management for Wordy
//!
//! Defaults, overlaid by the optional TOML file, overlaid by environment
//! variables.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::conversation::OrchestratorSettings;
use crate::permission::Authorization;
use crate::voice::{
    CaptureOptions, DEFAULT_ENERGY_THRESHOLD, DEFAULT_FINALIZE_DELAY, DEFAULT_LISTEN_TIMEOUT,
    DEFAULT_RESTART_DELAY, SttProvider, TtsProvider,
};
use crate::{Error, Result};

use file::WordyConfigFile;

/// Default HTTP API port
pub const DEFAULT_PORT: u16 = 18_800;

/// Wordy configuration
#[derive(Debug)]
pub struct Config {
    pub voice: VoiceConfig,
    pub wake: WakeConfig,
    pub capture: CaptureConfig,
    pub conversation: ConversationConfig,
    pub dictionary: DictionaryConfig,
    pub api_server: ApiServerConfig,
    pub api_keys: ApiKeys,

    /// Path to data directory (database)
    pub data_dir: PathBuf,
}

/// Speech backends
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub stt_provider: SttProvider,
    pub stt_model: String,
    pub stt_base_url: Option<String>,
    pub tts_provider: TtsProvider,
    pub tts_model: String,
    pub tts_voice: String,
    /// Playback speed multiplier, 0.25 to 4.0
    pub tts_speed: f32,
    pub tts_base_url: Option<String>,
    /// Forced authorization status; probed from the audio host when unset
    pub authorization: Option<Authorization>,
}

/// Wake phrase monitor
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Start in wake word mode
    pub enabled: bool,
    pub phrases: Vec<String>,
    pub aliases: Vec<String>,
    pub restart_delay: Duration,
    /// Chime on detection
    pub cue: bool,
}

/// Speech capture tuning
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    pub finalize_delay: Duration,
    pub listen_timeout: Duration,
    /// How often in-progress audio is transcribed for partial results
    pub partial_interval: Duration,
    pub energy_threshold: f32,
}

impl CaptureConfig {
    #[must_use]
    pub const fn options(&self) -> CaptureOptions {
        CaptureOptions {
            finalize_after_first_result: self.finalize_delay,
            listen_timeout: self.listen_timeout,
        }
    }
}

/// Conversation pacing
#[derive(Debug, Clone, Copy)]
pub struct ConversationConfig {
    pub speech_rate: f32,
    pub sequence_pause: Duration,
    pub failure_recovery: Duration,
}

/// Dictionary service
#[derive(Debug, Clone)]
pub struct DictionaryConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub cache_ttl: Duration,
}

/// HTTP API server configuration
#[derive(Debug, Clone, Copy)]
pub struct ApiServerConfig {
    pub enabled: bool,
    pub port: u16,
}

/// API keys; never printed by `Debug`
#[derive(Debug, Default)]
pub struct ApiKeys {
    pub openai: Option<SecretString>,
    pub elevenlabs: Option<SecretString>,
    pub deepgram: Option<SecretString>,
}

impl ApiKeys {
    /// Key for the configured transcription provider
    #[must_use]
    pub const fn stt(&self, provider: SttProvider) -> Option<&SecretString> {
        match provider {
            SttProvider::Whisper => self.openai.as_ref(),
            SttProvider::Deepgram => self.deepgram.as_ref(),
        }
    }

    /// Key for the configured synthesis provider
    #[must_use]
    pub const fn tts(&self, provider: TtsProvider) -> Option<&SecretString> {
        match provider {
            TtsProvider::OpenAi => self.openai.as_ref(),
            TtsProvider::ElevenLabs => self.elevenlabs.as_ref(),
        }
    }
}

fn millis(value: Option<u64>, default: Duration) -> Duration {
    value.map_or(default, Duration::from_millis)
}

fn secret(value: Option<String>) -> Option<SecretString> {
    value.filter(|s| !s.is_empty()).map(SecretString::from)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Default data directory: `~/.local/share/wordy` on Linux
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/wordy"),
        |d| d.data_dir().join("wordy"),
    )
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// `path` overrides the `WORDY_CONFIG` variable, which overrides the
    /// standard location.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unreadable or any value
    /// is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("WORDY_CONFIG").ok().map(PathBuf::from));
        let fc = file::load_config_file(explicit.as_deref())?;
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a config file body, ignoring the environment
    ///
    /// # Errors
    ///
    /// Returns error if the TOML is malformed or any value is invalid
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::resolve(file::parse(content)?, |_| None)
    }

    /// Overlay `env` on top of the file config (env > toml > default)
    fn resolve(fc: WordyConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_keys = ApiKeys {
            openai: secret(env("OPENAI_API_KEY").or(fc.api_keys.openai)),
            elevenlabs: secret(env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs)),
            deepgram: secret(env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram)),
        };

        let stt_provider = match fc.voice.stt_provider.as_deref() {
            Some(s) => SttProvider::from_str_value(s)
                .ok_or_else(|| Error::Config(format!("unknown STT provider: {s}")))?,
            None => SttProvider::default(),
        };
        let tts_provider = match fc.voice.tts_provider.as_deref() {
            Some(s) => TtsProvider::from_str_value(s)
                .ok_or_else(|| Error::Config(format!("unknown TTS provider: {s}")))?,
            None => TtsProvider::default(),
        };
        let authorization = match env("WORDY_AUTHORIZATION").or(fc.voice.authorization) {
            Some(s) => Some(
                Authorization::from_str_value(&s)
                    .ok_or_else(|| Error::Config(format!("unknown authorization status: {s}")))?,
            ),
            None => None,
        };

        let tts_speed = fc.voice.tts_speed.unwrap_or(1.0);
        if !(0.25..=4.0).contains(&tts_speed) {
            return Err(Error::Config(format!(
                "tts_speed must be between 0.25 and 4.0, got {tts_speed}"
            )));
        }

        let voice = VoiceConfig {
            stt_model: fc.voice.stt_model.unwrap_or_else(|| match stt_provider {
                SttProvider::Whisper => "whisper-1".to_string(),
                SttProvider::Deepgram => "nova-2".to_string(),
            }),
            stt_base_url: fc.voice.stt_base_url,
            tts_model: fc.voice.tts_model.unwrap_or_else(|| match tts_provider {
                TtsProvider::OpenAi => "tts-1".to_string(),
                TtsProvider::ElevenLabs => "eleven_monolingual_v1".to_string(),
            }),
            tts_voice: fc.voice.tts_voice.unwrap_or_else(|| match tts_provider {
                TtsProvider::OpenAi => "alloy".to_string(),
                TtsProvider::ElevenLabs => "21m00Tcm4TlvDq8ikWAM".to_string(),
            }),
            tts_speed,
            tts_base_url: fc.voice.tts_base_url,
            stt_provider,
            tts_provider,
            authorization,
        };

        let phrases = env("WORDY_WAKE_PHRASES")
            .map(|s| split_list(&s))
            .or(fc.wake.phrases)
            .unwrap_or_else(|| vec!["hey wordy".to_string()]);
        let wake = WakeConfig {
            enabled: fc.wake.enabled.unwrap_or(true),
            aliases: fc.wake.aliases.unwrap_or_else(|| vec!["wordy".to_string()]),
            phrases,
            restart_delay: millis(fc.wake.restart_delay_ms, DEFAULT_RESTART_DELAY),
            cue: fc.wake.cue.unwrap_or(true),
        };
        if wake.phrases.is_empty() && wake.aliases.is_empty() {
            return Err(Error::Config(
                "at least one wake phrase or alias is required".to_string(),
            ));
        }

        let capture = CaptureConfig {
            finalize_delay: millis(fc.capture.finalize_delay_ms, DEFAULT_FINALIZE_DELAY),
            listen_timeout: millis(fc.capture.listen_timeout_ms, DEFAULT_LISTEN_TIMEOUT),
            partial_interval: millis(fc.capture.partial_interval_ms, Duration::from_millis(700)),
            energy_threshold: fc.capture.energy_threshold.unwrap_or(DEFAULT_ENERGY_THRESHOLD),
        };
        if capture.energy_threshold <= 0.0 {
            return Err(Error::Config("energy_threshold must be positive".to_string()));
        }

        let speech_rate = fc.conversation.speech_rate.unwrap_or(1.0);
        if speech_rate <= 0.0 {
            return Err(Error::Config("speech_rate must be positive".to_string()));
        }
        let conversation = ConversationConfig {
            speech_rate,
            sequence_pause: millis(fc.conversation.sequence_pause_ms, Duration::from_millis(300)),
            failure_recovery: millis(fc.conversation.failure_recovery_ms, Duration::from_secs(3)),
        };

        let dictionary = DictionaryConfig {
            base_url: env("WORDY_DICTIONARY_URL")
                .or(fc.dictionary.base_url)
                .unwrap_or_else(|| crate::dictionary::DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_secs(fc.dictionary.timeout_secs.unwrap_or(10)),
            cache_ttl: Duration::from_secs(fc.dictionary.cache_ttl_secs.unwrap_or(3600)),
        };

        let api_server = ApiServerConfig {
            enabled: fc.server.enabled.unwrap_or(true),
            port: env("WORDY_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
        };

        let data_dir = env("WORDY_DATA_DIR")
            .or(fc.server.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        Ok(Self {
            voice,
            wake,
            capture,
            conversation,
            dictionary,
            api_server,
            api_keys,
            data_dir,
        })
    }

    /// Path to the word database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("wordy.db")
    }

    /// Orchestrator settings derived from this configuration
    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            speech_rate: self.conversation.speech_rate,
            voice: Some(self.voice.tts_voice.clone()),
            sequence_pause: self.conversation.sequence_pause,
            failure_recovery: self.conversation.failure_recovery,
            wake_phrase_label: self
                .wake
                .phrases
                .first()
                .or_else(|| self.wake.aliases.first())
                .cloned()
                .unwrap_or_default(),
            ..OrchestratorSettings::default()
        }
    }
}
