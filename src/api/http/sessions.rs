// src/api/http/sessions.rs
// Session CRUD

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::api::error::{ApiResult, IntoApiErrorOption};
use crate::chat::Session;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub title: Option<String>,
}

pub async fn create_session(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Session>) {
    let session = state.ledger.create_session();
    (StatusCode::CREATED, Json(session))
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<Session>> {
    Json(state.ledger.list_sessions())
}

pub async fn rename_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> ApiResult<Json<Session>> {
    let title = req.title.ok_or_bad_request("title is required")?;
    let session = state.ledger.rename_session(&id, &title)?;
    Ok(Json(session))
}

/// Cascading delete; live streams of the session are closed
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let removed = state.orchestrator.delete_session(&id).await?;
    info!(session_id = %id, messages = removed, "Deleted via API");
    Ok(StatusCode::NO_CONTENT)
}
