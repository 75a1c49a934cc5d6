//! Text-to-speech over HTTP

use serde::Serialize;

use crate::{Error, Result};

/// Default base URL for `OpenAI` speech synthesis
pub const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Default base URL for `ElevenLabs`
pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";

/// TTS provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProvider {
    #[default]
    OpenAi,
    ElevenLabs,
}

impl TtsProvider {
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "elevenlabs" | "eleven_labs" => Some(Self::ElevenLabs),
            _ => None,
        }
    }

    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => OPENAI_BASE_URL,
            Self::ElevenLabs => ELEVENLABS_BASE_URL,
        }
    }
}

/// Synthesizes speech from text, returning MP3 bytes
#[derive(Debug, Clone)]
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    model: String,
    base_url: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a synthesis client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(
        provider: TtsProvider,
        api_key: String,
        model: String,
        voice: String,
        base_url: Option<String>,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(format!(
                "API key required for {provider:?} speech synthesis"
            )));
        }

        let base_url = base_url
            .unwrap_or_else(|| provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            model,
            base_url,
            provider,
        })
    }

    /// Default voice used when a request names none
    #[must_use]
    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Synthesize `text` at `speed` with an optional voice override
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the API answers with an error
    pub async fn synthesize(&self, text: &str, voice: Option<&str>, speed: f32) -> Result<Vec<u8>> {
        let voice = voice.unwrap_or(&self.voice);
        tracing::debug!(chars = text.len(), voice, speed, "synthesizing speech");
        match self.provider {
            TtsProvider::OpenAi => self.synthesize_openai(text, voice, speed).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text, voice).await,
        }
    }

    async fn synthesize_openai(&self, text: &str, voice: &str, speed: f32) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            speed: speed.clamp(0.25, 4.0),
        };

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn synthesize_elevenlabs(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.base_url,
            urlencoding::encode(voice)
        );

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&ElevenLabsRequest {
                text,
                model_id: &self.model,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_openai_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .and(body_partial_json(serde_json::json!({
                "model": "tts-1",
                "input": "Yes?",
                "voice": "nova"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .expect(1)
            .mount(&server)
            .await;

        let tts = TextToSpeech::new(
            TtsProvider::OpenAi,
            "sk-test".into(),
            "tts-1".into(),
            "alloy".into(),
            Some(server.uri()),
        )
        .unwrap();

        let audio = tts.synthesize("Yes?", Some("nova"), 1.0).await.unwrap();
        assert_eq!(audio, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_elevenlabs_uses_voice_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/text-to-speech/rachel"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8]))
            .mount(&server)
            .await;

        let tts = TextToSpeech::new(
            TtsProvider::ElevenLabs,
            "xi-test".into(),
            "eleven_monolingual_v1".into(),
            "rachel".into(),
            Some(server.uri()),
        )
        .unwrap();

        assert_eq!(tts.synthesize("hello", None, 1.0).await.unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let tts = TextToSpeech::new(
            TtsProvider::OpenAi,
            "sk-test".into(),
            "tts-1".into(),
            "alloy".into(),
            Some(server.uri()),
        )
        .unwrap();

        let err = tts.synthesize("hi", None, 1.0).await.unwrap_err();
        assert!(matches!(err, Error::Tts(msg) if msg.contains("401")));
    }
}
