// src/api/http/stream.rs
// SSE gateway: one browser connection <-> one multiplexer subscription

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::stream;
use std::{convert::Infallible, sync::Arc};
use tracing::debug;

use crate::error::RelayError;
use crate::relay::StreamEvent;
use crate::state::AppState;

fn sse_event(event: &StreamEvent) -> Event {
    Event::default().data(event.to_json().to_string())
}

/// `GET /{session_id}/message/stream`
///
/// Subscribes before checking that the session exists, so a concurrent
/// identifier substitution either moves this subscriber or makes the check
/// fail. The subscription is dropped with the response body when the client
/// disconnects.
pub async fn stream_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    let subscription = state.multiplexer.subscribe(&session_id);

    if !state.ledger.session_exists(&session_id) {
        drop(subscription);
        debug!(session_id = %session_id, "Stream requested for unknown session");
        let message = RelayError::SessionNotFound(session_id).to_string();
        let frames = [StreamEvent::error(message), StreamEvent::End]
            .map(|event| Ok::<_, Infallible>(sse_event(&event)));
        return (StatusCode::NOT_FOUND, Sse::new(stream::iter(frames))).into_response();
    }

    debug!(session_id = %session_id, subscriber = ?subscription.handle(), "Stream opened");

    let events = async_stream::stream! {
        let mut subscription = subscription;
        loop {
            match subscription.recv().await {
                Some(event) => {
                    let finished = event == StreamEvent::End;
                    yield Ok::<_, Infallible>(sse_event(&event));
                    if finished {
                        break;
                    }
                }
                // Dropped as a slow consumer or the session was deleted
                None => {
                    yield Ok(sse_event(&StreamEvent::End));
                    break;
                }
            }
        }
    };

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}
