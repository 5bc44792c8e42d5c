//! Parley - chat backend that relays streamed AI replies to browsers
//!
//! - `relay`: upstream client, incremental SSE frame parser, per-session fan-out
//! - `chat`: session/message ledger and the streaming send orchestrator
//! - `api`: REST endpoints and the SSE gateway
//! - `auth`: accounts, JWTs and login rate limiting

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod relay;
pub mod state;

pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use state::AppState;
