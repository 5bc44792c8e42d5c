// src/state.rs
// Shared application state handed to every HTTP handler

use std::sync::Arc;
use std::time::Duration;

use crate::{
    auth::{AuthService, LoginRateLimiter},
    chat::{ChatOrchestrator, Ledger},
    config::RelayConfig,
    error::RelayResult,
    relay::{Multiplexer, UpstreamClient},
};

pub struct AppState {
    // -------- Config --------
    pub config: Arc<RelayConfig>,

    // -------- Chat --------
    pub ledger: Arc<Ledger>,
    pub multiplexer: Arc<Multiplexer>,
    pub orchestrator: Arc<ChatOrchestrator>,

    // -------- Auth --------
    pub auth_service: Arc<AuthService>,
    pub login_limiter: Arc<LoginRateLimiter>,
}

impl AppState {
    pub fn new(config: RelayConfig, upstream: Arc<dyn UpstreamClient>) -> RelayResult<Self> {
        let auth_service = AuthService::from_config(&config)?;
        Ok(Self::with_auth(config, upstream, auth_service))
    }

    /// Assemble with a ready-made auth service
    pub fn with_auth(
        config: RelayConfig,
        upstream: Arc<dyn UpstreamClient>,
        auth_service: AuthService,
    ) -> Self {
        let ledger = Arc::new(Ledger::new());
        let multiplexer = Arc::new(Multiplexer::new(
            config.max_subscribers_per_session,
            config.subscriber_buffer,
        ));
        let orchestrator = Arc::new(ChatOrchestrator::new(
            ledger.clone(),
            multiplexer.clone(),
            upstream,
            config.history_policy,
        ));
        let login_limiter = Arc::new(LoginRateLimiter::new(
            config.login_max_attempts,
            Duration::from_secs(config.login_window_secs),
        ));

        Self {
            config: Arc::new(config),
            ledger,
            multiplexer,
            orchestrator,
            auth_service: Arc::new(auth_service),
            login_limiter,
        }
    }
}
