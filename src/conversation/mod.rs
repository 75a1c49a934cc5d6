//! Conversation orchestration
//!
//! Sequences wake phrase → prompt → capture → confirm → lookup → definition
//! on top of the voice subsystems.

mod orchestrator;
mod state;
mod word;

pub use orchestrator::{Collaborators, Orchestrator, OrchestratorSettings};
pub use state::{ConversationSnapshot, ConversationState, Transition};
pub use word::extract_word;
