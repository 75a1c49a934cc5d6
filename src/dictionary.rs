//! Dictionary lookup client
//!
//! Talks to a dictionaryapi.dev-compatible endpoint and caches successful
//! lookups for a while.

use std::time::Duration;

use async_trait::async_trait;
use mini_moka::sync::Cache;
use serde::Deserialize;

use crate::{Error, Result};

/// Public Free Dictionary API
pub const DEFAULT_BASE_URL: &str = "https://api.dictionaryapi.dev";

/// Resolves a word to a definition
#[async_trait]
pub trait DictionaryLookup: Send + Sync {
    /// # Errors
    ///
    /// Returns `LookupNotFound` when the word has no entry and
    /// `LookupTransport` when the service cannot be reached or misbehaves
    async fn lookup(&self, word: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct Entry {
    #[serde(default)]
    meanings: Vec<Meaning>,
}

#[derive(Deserialize)]
struct Meaning {
    #[serde(default, rename = "partOfSpeech")]
    part_of_speech: Option<String>,
    #[serde(default)]
    definitions: Vec<Definition>,
}

#[derive(Deserialize)]
struct Definition {
    definition: String,
}

/// HTTP dictionary client with a TTL cache
pub struct DictionaryClient {
    client: reqwest::Client,
    base_url: String,
    cache: Cache<String, String>,
}

impl DictionaryClient {
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        cache_ttl: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wordy/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: Cache::builder()
                .max_capacity(512)
                .time_to_live(cache_ttl)
                .build(),
        })
    }

    async fn fetch(&self, word: &str) -> Result<String> {
        let url = format!(
            "{}/api/v2/entries/en/{}",
            self.base_url,
            urlencoding::encode(word)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::LookupTransport(describe_transport(&e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::LookupNotFound(word.to_string()));
        }
        if !status.is_success() {
            tracing::warn!(%status, word, "dictionary API error");
            return Err(Error::LookupTransport(format!("the service answered {status}")));
        }

        let entries: Vec<Entry> = response
            .json()
            .await
            .map_err(|e| Error::LookupTransport(format!("unreadable response: {e}")))?;

        first_definition(&entries).ok_or_else(|| Error::LookupNotFound(word.to_string()))
    }
}

fn describe_transport(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "the request timed out".to_string()
    } else if e.is_connect() {
        "could not connect".to_string()
    } else {
        e.to_string()
    }
}

fn first_definition(entries: &[Entry]) -> Option<String> {
    entries
        .iter()
        .flat_map(|entry| &entry.meanings)
        .find_map(|meaning| {
            let definition = meaning.definitions.first()?.definition.trim();
            if definition.is_empty() {
                return None;
            }
            tracing::trace!(part_of_speech = ?meaning.part_of_speech, "picked definition");
            Some(definition.to_string())
        })
}

#[async_trait]
impl DictionaryLookup for DictionaryClient {
    async fn lookup(&self, word: &str) -> Result<String> {
        let key = word.trim().to_lowercase();
        if key.is_empty() {
            return Err(Error::LookupNotFound(word.to_string()));
        }

        if let Some(definition) = self.cache.get(&key) {
            tracing::debug!(word = %key, "dictionary cache hit");
            return Ok(definition);
        }

        let definition = self.fetch(&key).await?;
        tracing::info!(word = %key, "definition found");
        self.cache.insert(key, definition.clone());
        Ok(definition)
    }
}
