//! Conversation states and the snapshot published to observers

use serde::Serialize;

use crate::permission::Authorization;

/// Where the current turn is; exactly one at a time
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "data", rename_all = "camelCase")]
pub enum ConversationState {
    #[default]
    Idle,
    PromptingUser,
    AwaitingWord,
    ConfirmingWord(String),
    LookingUpWord(String),
    SpeakingDefinition { word: String, definition: String },
    Failed(String),
}

impl ConversationState {
    /// Stable name used in logs and the HTTP API
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PromptingUser => "promptingUser",
            Self::AwaitingWord => "awaitingWord",
            Self::ConfirmingWord(_) => "confirmingWord",
            Self::LookingUpWord(_) => "lookingUpWord",
            Self::SpeakingDefinition { .. } => "speakingDefinition",
            Self::Failed(_) => "failed",
        }
    }

    /// Word carried by the state, if any
    #[must_use]
    pub fn word(&self) -> Option<&str> {
        match self {
            Self::ConfirmingWord(word)
            | Self::LookingUpWord(word)
            | Self::SpeakingDefinition { word, .. } => Some(word),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Human-readable line for the current state
    #[must_use]
    pub fn status_message(&self, wake_word_mode: bool, wake_phrase: &str) -> String {
        match self {
            Self::Idle if wake_word_mode => format!("Say \"{wake_phrase}\" to look up a word"),
            Self::Idle => "Ready. Start a conversation to look up a word".to_string(),
            Self::PromptingUser => "Which word would you like to look up?".to_string(),
            Self::AwaitingWord => "Listening...".to_string(),
            Self::ConfirmingWord(word) => format!("Heard \"{word}\""),
            Self::LookingUpWord(word) => format!("Looking up \"{word}\"..."),
            Self::SpeakingDefinition { word, .. } => format!("Definition of \"{word}\""),
            Self::Failed(message) => format!("Error: {message}"),
        }
    }
}

/// Everything an observer needs to render the conversation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub state: ConversationState,
    pub status_message: String,
    pub captured_word: Option<String>,
    pub wake_word_mode: bool,
    pub partial_transcript: String,
    pub authorization: Authorization,
}

/// A state change, as broadcast to transition subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: ConversationState,
    pub to: ConversationState,
}
