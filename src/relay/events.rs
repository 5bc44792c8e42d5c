//! Stream event types
//!
//! `ProviderFrame` is what the upstream provider sends in each SSE frame.
//! `StreamEvent` is what the relay fans out to browser connections.

use serde::Deserialize;
use serde_json::{Value, json};

/// Finish reason that marks the provider's final frame.
pub const FINISH_STOP: &str = "stop";

// ============================================================================
// Provider frames
// ============================================================================

/// One decoded frame from the provider stream
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderFrame {
    #[serde(default)]
    pub output: Option<FrameOutput>,
    #[serde(default)]
    pub request_id: Option<String>,
    /// Set together with `message` on provider-side errors
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameOutput {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ProviderFrame {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn text(&self) -> Option<&str> {
        self.output.as_ref()?.text.as_deref()
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.output.as_ref()?.finish_reason.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.output
            .as_ref()?
            .session_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }

    pub fn is_stop(&self) -> bool {
        self.finish_reason() == Some(FINISH_STOP)
    }

    /// Error payload without any output, e.g. `{"code":"InvalidApiKey","message":"..."}`
    pub fn error_message(&self) -> Option<String> {
        if self.output.is_some() {
            return None;
        }
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => Some(format!("{}: {}", code, message)),
            (None, Some(message)) => Some(message.clone()),
            (Some(code), None) => Some(code.clone()),
            (None, None) => None,
        }
    }
}

// ============================================================================
// Relay events
// ============================================================================

/// The three channels a subscriber can listen on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Data,
    End,
    Error,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Data, ChannelKind::End, ChannelKind::Error];
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Data => write!(f, "data"),
            ChannelKind::End => write!(f, "end"),
            ChannelKind::Error => write!(f, "error"),
        }
    }
}

/// Content update for one provider frame. `text` is the full text so far, not a diff.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub text: String,
    pub finish_reason: Option<String>,
    /// Ledger identifier of the session at the time the frame was relayed
    pub session_id: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(Delta),
    End,
    Error { message: String },
}

impl StreamEvent {
    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            StreamEvent::Delta(_) => ChannelKind::Data,
            StreamEvent::End => ChannelKind::End,
            StreamEvent::Error { .. } => ChannelKind::Error,
        }
    }

    /// JSON body of the SSE frame written to the browser
    pub fn to_json(&self) -> Value {
        match self {
            StreamEvent::Delta(delta) => json!({
                "output": {
                    "text": delta.text,
                    "finish_reason": delta.finish_reason,
                    "session_id": delta.session_id,
                },
                "request_id": delta.request_id,
            }),
            StreamEvent::End => json!({ "end": true }),
            StreamEvent::Error { message } => json!({ "error": true, "msg": message }),
        }
    }
}
