// src/api/http/middleware.rs
// Bearer-token check and client address extraction

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{HeaderMap, Uri, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tracing::debug;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Token from `Authorization: Bearer`, else from the `token` query parameter.
/// Browsers' EventSource cannot set headers, hence the query fallback.
pub fn request_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    from_header.or_else(|| {
        let query = uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
            .filter(|t| !t.is_empty())
    })
}

/// No token passes through unless auth is required. A bad token is 403.
/// Valid claims are stored in the request extensions.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match request_token(request.headers(), request.uri()) {
        None if state.config.require_auth => Err(ApiError::unauthorized("Access token required")),
        None => Ok(next.run(request).await),
        Some(token) => {
            let claims = state.auth_service.verify_token(&token).map_err(|e| {
                debug!(path = %request.uri().path(), "Rejected token: {}", e);
                ApiError::forbidden("Invalid or expired token")
            })?;
            request.extensions_mut().insert(claims);
            Ok(next.run(request).await)
        }
    }
}

/// Rate-limit key for a request: the socket peer, or loopback when the
/// server was built without connect info. `X-Forwarded-For` is a client
/// header, so its first hop is only used when the deployment trusts it.
pub fn client_addr(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = forwarded {
            return addr.to_string();
        }
    }

    peer.map_or_else(|| "127.0.0.1".to_string(), |p| p.ip().to_string())
}

/// Client address for login rate limiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

impl FromRequestParts<Arc<AppState>> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(peer)| *peer);
        Ok(Self(client_addr(&parts.headers, peer, state.config.trust_forwarded_for)))
    }
}
