// src/auth/password.rs

use bcrypt::{BcryptError, hash, verify};

use crate::error::{RelayError, RelayResult};

pub use bcrypt::DEFAULT_COST;

pub fn hash_password(password: &str, cost: u32) -> RelayResult<String> {
    hash(password, cost)
        .map_err(|e: BcryptError| RelayError::Credential(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> RelayResult<bool> {
    verify(password, hash)
        .map_err(|e: BcryptError| RelayError::Credential(format!("Failed to verify password: {}", e)))
}
