//! Conversation control endpoints
//!
//! Commands are queued to the conversation actor and answered with
//! `202 Accepted`; observe the outcome through `GET /api/conversation` or
//! the WebSocket.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;

use super::ApiState;
use crate::conversation::ConversationSnapshot;

/// Body of `POST /wake-word`
#[derive(Debug, Deserialize)]
pub struct WakeWordRequest {
    pub enabled: bool,
}

async fn snapshot(State(state): State<Arc<ApiState>>) -> Json<ConversationSnapshot> {
    Json(state.orchestrator.snapshot())
}

async fn start(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.orchestrator.start_conversation();
    StatusCode::ACCEPTED
}

async fn cancel(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.orchestrator.cancel_conversation();
    StatusCode::ACCEPTED
}

async fn reset(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.orchestrator.reset();
    StatusCode::ACCEPTED
}

async fn wake_word(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<WakeWordRequest>,
) -> StatusCode {
    if request.enabled {
        state.orchestrator.enable_wake_word_mode();
    } else {
        state.orchestrator.disable_wake_word_mode();
    }
    StatusCode::ACCEPTED
}

/// Build conversation router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(snapshot))
        .route("/start", post(start))
        .route("/cancel", post(cancel))
        .route("/reset", post(reset))
        .route("/wake-word", post(wake_word))
        .with_state(state)
}
