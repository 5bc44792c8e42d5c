// src/chat/orchestrator.rs
// Streaming send: user message -> upstream -> parsed frames -> ledger + fan-out

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ledger::Ledger;
use super::locks::SessionLocks;
use super::types::{FileInfo, Message, NewMessage, Role, is_placeholder};
use crate::config::HistoryPolicy;
use crate::error::{RelayError, RelayResult};
use crate::relay::events::{Delta, ProviderFrame, StreamEvent};
use crate::relay::multiplexer::Multiplexer;
use crate::relay::parser::frames;
use crate::relay::upstream::{CompletionRequest, PromptMessage, UpstreamClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Sent,
    Streaming,
    Completed,
    Failed,
}

impl SendState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SendState::Completed | SendState::Failed)
    }
}

/// How one send ended
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    /// Ledger identifier at the end of the send (after any substitution)
    pub session_id: String,
    pub state: SendState,
    pub assistant_message_id: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            state: SendState::Sent,
            assistant_message_id: None,
            error: None,
        }
    }
}

/// Publishes exactly one `End` for a send, under whatever key the session has
/// when the guard drops. Runs on every exit path including task abort.
struct EndOfStream {
    multiplexer: Arc<Multiplexer>,
    session_id: String,
}

impl EndOfStream {
    fn new(multiplexer: Arc<Multiplexer>, session_id: &str) -> Self {
        Self {
            multiplexer,
            session_id: session_id.to_string(),
        }
    }
}

impl Drop for EndOfStream {
    fn drop(&mut self) {
        self.multiplexer.publish(&self.session_id, StreamEvent::End);
    }
}

/// Assistant message state within one send
#[derive(Default)]
struct Reply {
    message_id: Option<String>,
    text: String,
    finalized: bool,
}

pub struct ChatOrchestrator {
    ledger: Arc<Ledger>,
    multiplexer: Arc<Multiplexer>,
    upstream: Arc<dyn UpstreamClient>,
    locks: Arc<SessionLocks>,
    history_policy: HistoryPolicy,
}

impl ChatOrchestrator {
    pub fn new(
        ledger: Arc<Ledger>,
        multiplexer: Arc<Multiplexer>,
        upstream: Arc<dyn UpstreamClient>,
        history_policy: HistoryPolicy,
    ) -> Self {
        Self {
            ledger,
            multiplexer,
            upstream,
            locks: Arc::new(SessionLocks::new()),
            history_policy,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.multiplexer
    }

    pub fn locks(&self) -> &Arc<SessionLocks> {
        &self.locks
    }

    /// Reject inputs that cannot be sent
    pub fn validate(input: &NewMessage) -> RelayResult<()> {
        if let Some(role) = input.role.as_deref() {
            if role != Role::User.as_str() {
                return Err(RelayError::validation(format!(
                    "role must be \"user\", got \"{}\"",
                    role
                )));
            }
        }
        if input.content.trim().is_empty() && input.files.is_empty() {
            return Err(RelayError::validation("content or files required"));
        }
        Ok(())
    }

    /// Fire-and-forget send. The outcome surfaces through the session's stream;
    /// the handle is there for callers that want to wait.
    pub fn dispatch(self: &Arc<Self>, session_id: &str, input: NewMessage) -> JoinHandle<SendOutcome> {
        let this = Arc::clone(self);
        let session_id = session_id.to_string();
        tokio::spawn(async move { this.send(&session_id, input).await })
    }

    /// Run one send to completion.
    ///
    /// Never returns an error: failures are published on the session's error
    /// channel and recorded in the outcome. An `End` event is published exactly
    /// once whatever happens.
    pub async fn send(&self, session_id: &str, input: NewMessage) -> SendOutcome {
        let mut end = EndOfStream::new(self.multiplexer.clone(), session_id);
        let mut outcome = SendOutcome::new(session_id);

        let Some((current_id, _guard)) = self.acquire(session_id).await else {
            self.fail(&mut outcome, RelayError::SessionNotFound(session_id.to_string()));
            return outcome;
        };
        if current_id != session_id {
            debug!(session_id, current_id = %current_id, "Queued send follows re-keyed session");
        }
        outcome.session_id = current_id.clone();
        end.session_id = current_id.clone();
        let session_id = current_id.as_str();

        // ── Sent
        let prompt = compose_prompt(&input.content, &input.files);
        let user_message = Message::new(session_id, Role::User, input.content, input.files);
        if let Err(e) = self.ledger.append_message(user_message) {
            self.fail(&mut outcome, e);
            return outcome;
        }

        let request = match self.build_request(session_id, prompt) {
            Ok(request) => request,
            Err(e) => {
                self.fail(&mut outcome, e);
                return outcome;
            }
        };
        info!(session_id, policy = %self.history_policy, "Send dispatched");

        let bytes = match self.upstream.stream_completion(request).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.fail(&mut outcome, e);
                return outcome;
            }
        };

        // ── Streaming
        outcome.state = SendState::Streaming;
        let mut reply = Reply::default();
        let mut substitution_refused = false;
        let stream = frames(bytes);
        futures::pin_mut!(stream);

        while let Some(item) = stream.next().await {
            let value = match item {
                Ok(value) => value,
                Err(e) => {
                    self.fail(&mut outcome, e);
                    break;
                }
            };
            let frame = match ProviderFrame::from_value(value) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, "Skipping frame with unexpected shape");
                    continue;
                }
            };
            if let Some(message) = frame.error_message() {
                self.fail(&mut outcome, RelayError::Upstream(message));
                break;
            }

            if let Some(new_id) = frame.session_id() {
                if !substitution_refused
                    && is_placeholder(&outcome.session_id)
                    && new_id != outcome.session_id
                {
                    match self.substitute(&outcome.session_id, new_id).await {
                        Ok(()) => {
                            outcome.session_id = new_id.to_string();
                            end.session_id = new_id.to_string();
                        }
                        Err(e) => {
                            warn!(
                                session_id = %outcome.session_id,
                                new_id,
                                error = %e,
                                "Keeping placeholder identifier"
                            );
                            substitution_refused = true;
                        }
                    }
                }
            }

            if let Err(e) = self.record(&outcome.session_id, &mut reply, &frame) {
                self.fail(&mut outcome, e);
                break;
            }

            let text = frame.text().map_or_else(|| reply.text.clone(), str::to_string);
            self.multiplexer.publish(
                &outcome.session_id,
                StreamEvent::Delta(Delta {
                    text,
                    finish_reason: frame.finish_reason().map(str::to_string),
                    session_id: outcome.session_id.clone(),
                    request_id: frame.request_id.clone(),
                }),
            );
        }

        outcome.assistant_message_id = reply.message_id;
        if outcome.state != SendState::Failed {
            if !reply.finalized {
                warn!(session_id = %outcome.session_id, "Upstream stream ended without a stop frame");
            }
            outcome.state = SendState::Completed;
            info!(session_id = %outcome.session_id, "Send completed");
        }
        outcome
    }

    /// Apply one frame to the ledger. Frames after the final one are ignored here.
    fn record(&self, session_id: &str, reply: &mut Reply, frame: &ProviderFrame) -> RelayResult<()> {
        if reply.finalized {
            return Ok(());
        }
        if let Some(text) = frame.text() {
            reply.text = text.to_string();
        }

        if frame.text().is_some() {
            match reply.message_id.as_deref() {
                Some(id) => self.ledger.update_message_content(session_id, id, &reply.text)?,
                None => {
                    let draft = Message::new(session_id, Role::Assistant, reply.text.clone(), vec![]);
                    reply.message_id = Some(self.ledger.append_message(draft)?.id);
                }
            }
        }

        if frame.is_stop() {
            let message_id = match &reply.message_id {
                Some(id) => id.clone(),
                None => {
                    let empty = Message::new(session_id, Role::Assistant, reply.text.clone(), vec![]);
                    self.ledger.append_message(empty)?.id
                }
            };
            let finished = self.ledger.finalize_message(
                session_id,
                &message_id,
                frame.request_id.as_deref(),
                &reply.text,
            )?;
            reply.message_id = Some(finished.id);
            reply.finalized = true;
        }
        Ok(())
    }

    /// Take the session's send lock under its current identifier. A send that
    /// queued on a placeholder follows the substitution made while it waited.
    async fn acquire(&self, session_id: &str) -> Option<(String, OwnedMutexGuard<()>)> {
        let mut current = self.ledger.resolve_session_id(session_id)?;
        loop {
            let lock = self.locks.get_lock(&current).await;
            let guard = Arc::clone(&lock).lock_owned().await;

            let Some(now) = self.ledger.resolve_session_id(&current) else {
                self.locks.remove(&current).await;
                return None;
            };
            // The lock moves with the session, so holding it under the old key is enough
            if now == current || Arc::ptr_eq(&lock, &self.locks.get_lock(&now).await) {
                return Some((now, guard));
            }
            drop(guard);
            current = now;
        }
    }

    fn build_request(&self, session_id: &str, prompt: String) -> RelayResult<CompletionRequest> {
        let provider_session = (!is_placeholder(session_id)).then(|| session_id.to_string());
        let messages = match self.history_policy {
            HistoryPolicy::ProviderSession => None,
            HistoryPolicy::FullReplay => Some(
                self.ledger
                    .history(session_id)?
                    .into_iter()
                    .map(|(role, content)| PromptMessage {
                        role: role.to_string(),
                        content,
                    })
                    .collect(),
            ),
        };
        Ok(CompletionRequest {
            prompt,
            session_id: provider_session,
            messages,
        })
    }

    /// Move a session from its placeholder to the provider's identifier
    async fn substitute(&self, old_id: &str, new_id: &str) -> RelayResult<()> {
        self.ledger.substitute_session_id(old_id, new_id)?;
        let moved = self.multiplexer.rekey(old_id, new_id);
        self.locks.rekey(old_id, new_id).await;
        info!(old_id, new_id, subscribers = moved, "Session re-keyed");
        Ok(())
    }

    /// Delete a session with its messages and close its live streams
    pub async fn delete_session(&self, session_id: &str) -> RelayResult<usize> {
        let removed = self.ledger.delete_session(session_id)?;
        self.multiplexer.close_session(session_id);
        self.locks.remove(session_id).await;
        Ok(removed)
    }

    fn fail(&self, outcome: &mut SendOutcome, err: RelayError) {
        error!(session_id = %outcome.session_id, error = %err, "Send failed");
        self.multiplexer
            .publish(&outcome.session_id, StreamEvent::error(err.to_string()));
        outcome.state = SendState::Failed;
        outcome.error = Some(err.to_string());
    }
}

/// Prompt text for the provider: the message, then one line per attachment
fn compose_prompt(content: &str, files: &[FileInfo]) -> String {
    let mut prompt = content.trim().to_string();
    for file in files {
        if !prompt.is_empty() {
            prompt.push('\n');
        }
        prompt.push_str(&format!("[Attachment: {} ({}) {}]", file.name, file.mime_type, file.url));
    }
    prompt
}
