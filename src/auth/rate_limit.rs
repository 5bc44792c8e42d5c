// src/auth/rate_limit.rs
// Failed-login counter per client address

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::{RelayError, RelayResult};

#[derive(Debug, Clone, Copy)]
struct Attempt {
    count: u32,
    last_attempt: Instant,
}

/// Blocks a client after `max_attempts` failed logins until `window` has
/// passed since its last attempt. A successful login clears the record.
pub struct LoginRateLimiter {
    attempts: Mutex<HashMap<String, Attempt>>,
    max_attempts: u32,
    window: Duration,
}

impl LoginRateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            max_attempts,
            window,
        }
    }

    /// Refuse when the client has used up its attempts within the window
    pub fn check(&self, client: &str) -> RelayResult<()> {
        let mut attempts = self.attempts.lock();
        let Some(attempt) = attempts.get_mut(client) else {
            return Ok(());
        };

        let now = Instant::now();
        if now.duration_since(attempt.last_attempt) > self.window {
            *attempt = Attempt {
                count: 0,
                last_attempt: now,
            };
            return Ok(());
        }

        if attempt.count >= self.max_attempts {
            warn!(client, attempts = attempt.count, "Login blocked");
            return Err(RelayError::RateLimited(
                "Too many login attempts. IP temporarily blocked.".to_string(),
            ));
        }
        Ok(())
    }

    pub fn record_failure(&self, client: &str) {
        let mut attempts = self.attempts.lock();
        let attempt = attempts.entry(client.to_string()).or_insert(Attempt {
            count: 0,
            last_attempt: Instant::now(),
        });
        attempt.count += 1;
        attempt.last_attempt = Instant::now();
    }

    pub fn record_success(&self, client: &str) {
        self.attempts.lock().remove(client);
    }

    pub fn failures(&self, client: &str) -> u32 {
        self.attempts.lock().get(client).map_or(0, |a| a.count)
    }
}
