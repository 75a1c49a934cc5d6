//! Wordy - hands-free spoken dictionary
//!
//! Listens for a wake phrase, asks which word to look up, confirms what it
//! heard, fetches the definition and reads it back, then remembers the word.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          HTTP API / WebSocket  │  CLI               │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │            Conversation orchestrator                │
//! │   state machine  │  dictionary  │  word store       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Voice subsystems                   │
//! │  wake monitor  │  speech capture  │  synthesis      │
//! │      audio session  │  cloud STT  │  cloud TTS      │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod conversation;
pub mod daemon;
pub mod db;
pub mod dictionary;
pub mod error;
pub mod permission;
pub mod voice;

pub use config::Config;
pub use conversation::{ConversationSnapshot, ConversationState, Orchestrator};
pub use daemon::Daemon;
pub use db::{DbConn, DbPool, WordRecord, WordRepo, WordStore};
pub use dictionary::{DictionaryClient, DictionaryLookup};
pub use error::{Error, Result};
pub use permission::{Authorization, PermissionGate};
