// src/api/http/mod.rs

pub mod auth;
pub mod messages;
pub mod middleware;
pub mod router;
pub mod sessions;
pub mod stream;
pub mod upload;

pub use router::{chat_router, create_router, serve};
