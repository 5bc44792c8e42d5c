// src/chat/ledger.rs
// In-memory session and message store

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

use super::types::{Message, PLACEHOLDER_PREFIX, Role, Session};
use crate::error::{RelayError, RelayResult};

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

#[derive(Default)]
struct LedgerState {
    sessions: Vec<Session>,
    messages: Vec<Message>,
    /// Replaced placeholder -> identifier it was replaced with
    aliases: HashMap<String, String>,
}

impl LedgerState {
    fn session_mut(&mut self, session_id: &str) -> RelayResult<&mut Session> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| RelayError::SessionNotFound(session_id.to_string()))
    }

    fn has_session(&self, session_id: &str) -> bool {
        self.sessions.iter().any(|s| s.id == session_id)
    }

    fn touch(&mut self, session_id: &str) {
        if let Ok(session) = self.session_mut(session_id) {
            session.updated_at = Utc::now();
        }
    }
}

/// Sessions and messages, in insertion order.
///
/// Lookups are linear scans. Every operation takes the lock once, so callers
/// never observe a half-applied change.
#[derive(Default)]
pub struct Ledger {
    state: RwLock<LedgerState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Sessions

    /// New session under a placeholder identifier
    pub fn create_session(&self) -> Session {
        let now = Utc::now();
        let session = Session {
            id: format!("{}{}", PLACEHOLDER_PREFIX, uuid::Uuid::new_v4().simple()),
            title: DEFAULT_SESSION_TITLE.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.state.write().sessions.push(session.clone());
        info!(session_id = %session.id, "Session created");
        session
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.state.read().sessions.clone()
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.state
            .read()
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        self.state.read().has_session(session_id)
    }

    /// Current identifier of a session, following placeholder substitutions.
    /// `None` once the session is gone.
    pub fn resolve_session_id(&self, session_id: &str) -> Option<String> {
        let state = self.state.read();
        let mut current = session_id;
        for _ in 0..=state.aliases.len() {
            match state.aliases.get(current) {
                Some(next) => current = next.as_str(),
                None => break,
            }
        }
        state.has_session(current).then(|| current.to_string())
    }

    pub fn rename_session(&self, session_id: &str, title: &str) -> RelayResult<Session> {
        let title = title.trim();
        if title.is_empty() {
            return Err(RelayError::validation("title is required"));
        }

        let mut state = self.state.write();
        let session = state.session_mut(session_id)?;
        session.title = title.to_string();
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    /// Delete a session and every message tagged with it. Returns how many messages went with it.
    pub fn delete_session(&self, session_id: &str) -> RelayResult<usize> {
        let mut state = self.state.write();
        let before = state.sessions.len();
        state.sessions.retain(|s| s.id != session_id);
        if state.sessions.len() == before {
            return Err(RelayError::SessionNotFound(session_id.to_string()));
        }

        let count = state.messages.len();
        state.messages.retain(|m| m.session_id != session_id);
        let removed = count - state.messages.len();
        state.aliases.retain(|_, target| target.as_str() != session_id);
        info!(session_id, messages = removed, "Session deleted");
        Ok(removed)
    }

    /// Swap a placeholder identifier for the provider's.
    ///
    /// Retags every message of the session. The old identifier stops resolving.
    pub fn substitute_session_id(&self, old_id: &str, new_id: &str) -> RelayResult<Session> {
        let mut state = self.state.write();
        if old_id != new_id && state.has_session(new_id) {
            return Err(RelayError::IdentifierConflict(new_id.to_string()));
        }

        let session = state.session_mut(old_id)?;
        session.id = new_id.to_string();
        let session = session.clone();

        for message in state.messages.iter_mut().filter(|m| m.session_id == old_id) {
            message.session_id = new_id.to_string();
        }
        for target in state.aliases.values_mut().filter(|t| t.as_str() == old_id) {
            *target = new_id.to_string();
        }
        state.aliases.insert(old_id.to_string(), new_id.to_string());
        info!(old_id, new_id, "Session identifier substituted");
        Ok(session)
    }

    // ── Messages

    pub fn messages(&self, session_id: &str) -> RelayResult<Vec<Message>> {
        let state = self.state.read();
        if !state.has_session(session_id) {
            return Err(RelayError::SessionNotFound(session_id.to_string()));
        }
        Ok(state
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }

    /// `(role, content)` pairs in order, for replaying to the provider
    pub fn history(&self, session_id: &str) -> RelayResult<Vec<(Role, String)>> {
        Ok(self
            .messages(session_id)?
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect())
    }

    pub fn clear_messages(&self, session_id: &str) -> RelayResult<usize> {
        let mut state = self.state.write();
        if !state.has_session(session_id) {
            return Err(RelayError::SessionNotFound(session_id.to_string()));
        }
        let count = state.messages.len();
        state.messages.retain(|m| m.session_id != session_id);
        Ok(count - state.messages.len())
    }

    /// Append to the session's messages and bump `updatedAt`
    pub fn append_message(&self, message: Message) -> RelayResult<Message> {
        let mut state = self.state.write();
        if !state.has_session(&message.session_id) {
            return Err(RelayError::SessionNotFound(message.session_id));
        }
        state.touch(&message.session_id);
        state.messages.push(message.clone());
        debug!(session_id = %message.session_id, message_id = %message.id, role = %message.role, "Message appended");
        Ok(message)
    }

    /// Replace the content of a message still being streamed
    pub fn update_message_content(&self, session_id: &str, message_id: &str, content: &str) -> RelayResult<()> {
        let mut state = self.state.write();
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.session_id == session_id && m.id == message_id)
            .ok_or_else(|| RelayError::MessageNotFound(message_id.to_string()))?;
        message.content = content.to_string();
        Ok(())
    }

    /// Write the final text of an assistant message, optionally switching to the
    /// provider's id. Bumps the session's `updatedAt`.
    pub fn finalize_message(
        &self,
        session_id: &str,
        message_id: &str,
        final_id: Option<&str>,
        content: &str,
    ) -> RelayResult<Message> {
        let mut state = self.state.write();
        // A provider id that collides with another message keeps the local one
        let final_id = final_id.filter(|id| {
            !state
                .messages
                .iter()
                .any(|m| m.id == *id && m.id != message_id)
        });

        let message = state
            .messages
            .iter_mut()
            .find(|m| m.session_id == session_id && m.id == message_id)
            .ok_or_else(|| RelayError::MessageNotFound(message_id.to_string()))?;
        message.content = content.to_string();
        if let Some(id) = final_id {
            message.id = id.to_string();
        }
        let message = message.clone();

        state.touch(session_id);
        Ok(message)
    }
}
