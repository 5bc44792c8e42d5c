// src/api/http/auth.rs

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    routing::{get, post},
};
use std::sync::Arc;
use tracing::warn;

use super::middleware::{ClientAddr, request_token};
use crate::api::error::{ApiError, ApiResult};
use crate::auth::{AuthResponse, LoginRequest, RegisterRequest, User};
use crate::error::RelayError;
use crate::state::AppState;

pub fn create_auth_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

async fn login(
    State(state): State<Arc<AppState>>,
    ClientAddr(client): ClientAddr,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    state.login_limiter.check(&client)?;

    match state.auth_service.login(&req) {
        Ok(response) => {
            state.login_limiter.record_success(&client);
            Ok(Json(response))
        }
        Err(e @ RelayError::Unauthorized(_)) => {
            state.login_limiter.record_failure(&client);
            warn!(
                client = %client,
                failures = state.login_limiter.failures(&client),
                "Failed login"
            );
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let response = state.auth_service.register(&req)?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn me(State(state): State<Arc<AppState>>, headers: HeaderMap, uri: Uri) -> ApiResult<Json<User>> {
    let token = request_token(&headers, &uri).ok_or_else(|| ApiError::unauthorized("Unauthorized"))?;
    let claims = state
        .auth_service
        .verify_token(&token)
        .map_err(|_| ApiError::unauthorized("Unauthorized"))?;
    let user = state
        .auth_service
        .user(&claims.sub)
        .ok_or_else(|| ApiError::unauthorized("Unauthorized"))?;
    Ok(Json(user))
}

/// Tokens are stateless; the client discards its copy
async fn logout() -> StatusCode {
    StatusCode::NO_CONTENT
}
