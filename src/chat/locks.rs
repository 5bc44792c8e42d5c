// src/chat/locks.rs
// Per-session locking

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// One writer per session at a time.
///
/// A send holds its session's lock from appending the user message until the
/// stream is finalized, so two sends to the same session never interleave
/// their ledger updates. Different sessions proceed in parallel.
#[derive(Default)]
pub struct SessionLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the lock for a session
    pub async fn get_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        // Fast path: check if lock exists
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(session_id) {
                return lock.clone();
            }
        }

        // Slow path: create lock if needed
        let mut locks = self.locks.write().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Move a lock to a new session identifier. Holders keep their guard;
    /// later callers of `get_lock(new_id)` queue behind it.
    pub async fn rekey(&self, old_id: &str, new_id: &str) {
        let mut locks = self.locks.write().await;
        if let Some(lock) = locks.remove(old_id) {
            locks.insert(new_id.to_string(), lock);
        }
    }

    pub async fn remove(&self, session_id: &str) {
        self.locks.write().await.remove(session_id);
    }

    pub async fn lock_count(&self) -> usize {
        self.locks.read().await.len()
    }
}
