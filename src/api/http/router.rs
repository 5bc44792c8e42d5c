// src/api/http/router.rs
// HTTP router composition and server startup

use anyhow::Result;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use chrono::Utc;
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{info, warn};

use super::{
    auth::create_auth_router,
    messages::{clear_messages, get_messages, send_message},
    middleware::require_token,
    sessions::{create_session, delete_session, list_sessions, rename_session},
    stream::stream_session,
    upload::upload_file,
};
use crate::state::AppState;

/// Cap for JSON request bodies
pub const JSON_BODY_LIMIT: usize = 50 * 1024 * 1024;

/// Multipart framing on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Routes nested under `/api/chat`
pub fn chat_router() -> Router<Arc<AppState>> {
    Router::new()
        // Sessions
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}", put(rename_session).delete(delete_session))

        // Messages
        .route("/{session_id}/messages", get(get_messages).delete(clear_messages))
        .route("/{session_id}/message", post(send_message))

        // Live stream (SSE)
        .route("/{session_id}/message/stream", get(stream_session))
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origin == "*" {
        return cors.allow_origin(Any);
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => cors.allow_origin(value),
        Err(_) => {
            warn!(origin, "Invalid CORS origin, allowing any");
            cors.allow_origin(Any)
        }
    }
}

async fn test_handler() -> Json<Value> {
    Json(json!({
        "message": "Parley backend is running!",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let config = state.config.clone();

    let protected = Router::new()
        .nest("/api/chat", chat_router())
        .route(
            "/api/upload",
            post(upload_file).layer(DefaultBodyLimit::max(config.upload_max_bytes + MULTIPART_OVERHEAD)),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let mut app = Router::new()
        .merge(protected)
        .nest("/api/auth", create_auth_router())
        .route("/api/test", get(test_handler))
        .nest_service("/uploads", ServeDir::new(&config.upload_dir));

    if let Some(dir) = &config.static_dir {
        let index = ServeFile::new(dir.join("index.html"));
        app = app.fallback_service(ServeDir::new(dir).fallback(index));
    }

    app.layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.cors_origin))
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let addr = state.config.bind_address();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
