//! Word history endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{ApiState, ErrorResponse, error_response};
use crate::Error;
use crate::db::WordRecord;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct WordListResponse {
    pub words: Vec<WordRecord>,
    pub total: u64,
}

fn db_error(e: &Error) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        error_response("db_error", &e.to_string()),
    )
}

fn not_found() -> ApiError {
    (
        StatusCode::NOT_FOUND,
        error_response("not_found", "Word not found"),
    )
}

/// Blocking repository work off the async runtime
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> crate::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_response("internal", &e.to_string()),
            )
        })?
        .map_err(|e| match e {
            Error::NotFound(_) => not_found(),
            other => db_error(&other),
        })
}

async fn list_words(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<WordListResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let repo = state.words.clone();

    let (words, total) = blocking(move || Ok((repo.list(limit)?, repo.count()?))).await?;
    Ok(Json(WordListResponse { words, total }))
}

async fn get_word(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<WordRecord>, ApiError> {
    let repo = state.words.clone();
    blocking(move || repo.get(&id))
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

async fn review_word(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<WordRecord>, ApiError> {
    let repo = state.words.clone();
    blocking(move || repo.record_review(&id)).await.map(Json)
}

async fn delete_word(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let repo = state.words.clone();
    if blocking(move || repo.delete(&id)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found())
    }
}

/// Build words router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_words))
        .route("/{id}", get(get_word).delete(delete_word))
        .route("/{id}/review", post(review_word))
        .with_state(state)
}
