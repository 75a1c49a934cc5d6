//! Daemon - the long-running Wordy service
//!
//! Wires audio, cloud speech, the dictionary and the word store into the
//! conversation orchestrator and serves the HTTP API next to it.

use std::sync::Arc;

use secrecy::ExposeSecret;

use crate::api::ApiServerBuilder;
use crate::conversation::{Collaborators, Orchestrator};
use crate::db::{self, DbPool, WordRepo};
use crate::dictionary::DictionaryClient;
use crate::permission::PermissionGate;
use crate::voice::{
    AudioPlayback, AudioSession, CaptureSession, CloudRecognizer, CloudSpeechOutput, SilentCue,
    SpeechRecognizer, SpeechToText, SynthesisQueue, TextToSpeech, ToneCue, WakeCue,
    WakePhraseMatcher, WakePhraseMonitor,
};
use crate::{Config, Error, Result};

/// Build the transcription client for the configured provider
///
/// # Errors
///
/// Returns `Config` error if the provider's API key is missing
pub fn speech_to_text(config: &Config) -> Result<SpeechToText> {
    let provider = config.voice.stt_provider;
    let key = config.api_keys.stt(provider).ok_or_else(|| {
        Error::Config(format!("no API key configured for {provider:?} transcription"))
    })?;

    SpeechToText::new(
        provider,
        key.expose_secret().to_string(),
        config.voice.stt_model.clone(),
        config.voice.stt_base_url.clone(),
    )
}

/// Build the synthesis client for the configured provider
///
/// # Errors
///
/// Returns `Config` error if the provider's API key is missing
pub fn text_to_speech(config: &Config) -> Result<TextToSpeech> {
    let provider = config.voice.tts_provider;
    let key = config.api_keys.tts(provider).ok_or_else(|| {
        Error::Config(format!("no API key configured for {provider:?} speech synthesis"))
    })?;

    TextToSpeech::new(
        provider,
        key.expose_secret().to_string(),
        config.voice.tts_model.clone(),
        config.voice.tts_voice.clone(),
        config.voice.tts_base_url.clone(),
    )
}

/// Build the dictionary client
///
/// # Errors
///
/// Returns error if the HTTP client cannot be built
pub fn dictionary(config: &Config) -> Result<DictionaryClient> {
    DictionaryClient::new(
        config.dictionary.base_url.clone(),
        config.dictionary.timeout,
        config.dictionary.cache_ttl,
    )
}

/// Synthesis queue speaking through the default output device
///
/// # Errors
///
/// Returns error if no TTS key is configured or no output device exists
pub fn synthesis_queue(config: &Config, audio: AudioSession) -> Result<SynthesisQueue> {
    let tts = text_to_speech(config)?;
    let playback = AudioPlayback::new()?;
    Ok(SynthesisQueue::new(
        Arc::new(CloudSpeechOutput::new(tts, playback)),
        audio,
    ))
}

/// Open the word database under the data directory
///
/// # Errors
///
/// Returns error if the directory or database cannot be created
pub fn open_database(config: &Config) -> Result<DbPool> {
    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.db_path();
    let pool = db::init(&db_path)?;
    tracing::debug!(path = %db_path.display(), "database opened");
    Ok(pool)
}

/// The Wordy daemon
pub struct Daemon {
    config: Config,
    db: DbPool,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened
    pub fn new(config: Config) -> Result<Self> {
        let db = open_database(&config)?;
        Ok(Self { config, db })
    }

    fn spawn_orchestrator(&self) -> Result<(Orchestrator, tokio::task::JoinHandle<()>)> {
        let config = &self.config;

        let stt = Arc::new(speech_to_text(config)?);
        let tts = text_to_speech(config)?;
        let playback = AudioPlayback::new()?;
        let audio = AudioSession::new();

        let recognizer: Arc<dyn SpeechRecognizer> = Arc::new(CloudRecognizer::new(
            stt,
            config.capture.energy_threshold,
            config.capture.partial_interval,
        ));
        let cue: Arc<dyn WakeCue> = if config.wake.cue {
            Arc::new(ToneCue::new(playback.clone()))
        } else {
            Arc::new(SilentCue)
        };

        let matcher =
            WakePhraseMatcher::new(config.wake.phrases.clone(), config.wake.aliases.clone())?;
        let (monitor, wake_detections) = WakePhraseMonitor::new(
            matcher,
            Arc::clone(&recognizer),
            audio.clone(),
            cue,
            config.wake.restart_delay,
        );
        let capture = CaptureSession::new(recognizer, audio.clone(), config.capture.options());
        let synthesis = SynthesisQueue::new(Arc::new(CloudSpeechOutput::new(tts, playback)), audio);

        let collaborators = Collaborators {
            monitor,
            wake_detections,
            capture,
            synthesis,
            dictionary: Arc::new(dictionary(config)?),
            store: Arc::new(WordRepo::new(self.db.clone())),
            permissions: PermissionGate::probe(config.voice.authorization),
        };

        Ok(Orchestrator::spawn(collaborators, config.orchestrator_settings()))
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if speech backends are not configured or the API server
    /// fails
    pub async fn run(self) -> Result<()> {
        let (orchestrator, actor) = self.spawn_orchestrator()?;

        if self.config.wake.enabled {
            orchestrator.enable_wake_word_mode();
        }

        let api = self.config.api_server.enabled.then(|| {
            ApiServerBuilder::new(
                self.db.clone(),
                orchestrator.clone(),
                self.config.api_server.port,
            )
            .build()
            .spawn()
        });

        tracing::info!(
            wake_word = self.config.wake.enabled,
            api = self.config.api_server.enabled,
            "daemon running"
        );

        let api_result = async {
            match api {
                Some(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(Error::Config(format!("API server task failed: {e}"))),
                },
                None => std::future::pending::<Result<()>>().await,
            }
        };

        let result = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                }
                tracing::info!("shutdown requested");
                Ok(())
            }
            result = api_result => result,
        };

        orchestrator.shutdown();
        if let Err(e) = actor.await {
            tracing::warn!(error = %e, "conversation task ended abnormally");
        }

        result
    }
}
