//! Domain errors shared by the relay, the ledger and the auth service.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The provider answered, but with an error payload or a broken stream.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed or incomplete frame. Recovered inside the parser, never sent to clients.
    #[error("Frame parse error: {0}")]
    FrameParse(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Session identifier already in use: {0}")]
    IdentifierConflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Too many attempts: {0}")]
    RateLimited(String),

    /// Hashing or token signing failed
    #[error("Credential error: {0}")]
    Credential(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// True for failures that originate at the provider rather than in this process.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            RelayError::Upstream(_) | RelayError::UpstreamStatus { .. } | RelayError::Http(_)
        )
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_classification() {
        assert!(RelayError::Upstream("boom".into()).is_upstream());
        assert!(
            RelayError::UpstreamStatus {
                status: 500,
                body: "oops".into()
            }
            .is_upstream()
        );
        assert!(!RelayError::SessionNotFound("s".into()).is_upstream());
    }

    #[test]
    fn test_display_includes_context() {
        let err = RelayError::SessionNotFound("temp_abc".into());
        assert_eq!(err.to_string(), "Session not found: temp_abc");
    }
}
