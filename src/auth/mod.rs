// src/auth/mod.rs

pub mod jwt;
pub mod password;
pub mod rate_limit;
pub mod service;

pub use jwt::{Claims, TokenIssuer};
pub use rate_limit::LoginRateLimiter;
pub use service::{AuthResponse, AuthService, LoginRequest, RegisterRequest, User};
