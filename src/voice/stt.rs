//! Speech-to-text over HTTP

use serde::Deserialize;

use crate::{Error, Result};

/// Default base URL for Whisper-compatible transcription
pub const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Default base URL for Deepgram
pub const DEEPGRAM_BASE_URL: &str = "https://api.deepgram.com";

#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

#[derive(Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttProvider {
    #[default]
    Whisper,
    Deepgram,
}

impl SttProvider {
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Some(Self::Whisper),
            "deepgram" => Some(Self::Deepgram),
            _ => None,
        }
    }

    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::Whisper => OPENAI_BASE_URL,
            Self::Deepgram => DEEPGRAM_BASE_URL,
        }
    }
}

/// Transcribes WAV audio to text
#[derive(Debug, Clone)]
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a transcription client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(
        provider: SttProvider,
        api_key: String,
        model: String,
        base_url: Option<String>,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(format!(
                "API key required for {provider:?} transcription"
            )));
        }

        let base_url = base_url
            .unwrap_or_else(|| provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url,
            provider,
        })
    }

    /// Transcribe WAV bytes
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the API answers with an error
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let text = match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio).await?,
            SttProvider::Deepgram => self.transcribe_deepgram(audio).await?,
        };
        Ok(text.trim().to_string())
    }

    async fn transcribe_whisper(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "{}/v1/listen?model={}&punctuate=true",
            self.base_url,
            urlencoding::encode(&self.model)
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;
        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::debug!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}
