// src/api/http/messages.rs
// Message history and the fire-and-forget send

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

use crate::api::error::ApiResult;
use crate::chat::{ChatOrchestrator, Message, NewMessage};
use crate::state::AppState;

pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.ledger.messages(&session_id)?))
}

pub async fn clear_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.ledger.clear_messages(&session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accepts the message and returns at once. The reply, or the failure, is
/// delivered on `/{session_id}/message/stream`.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(input): Json<NewMessage>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    ChatOrchestrator::validate(&input)?;

    // Detached: the send keeps running after this response and any disconnect
    drop(state.orchestrator.dispatch(&session_id, input));
    debug!(session_id = %session_id, "Send accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "sessionId": session_id })),
    ))
}
