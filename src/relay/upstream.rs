//! Upstream AI provider client
//!
//! Issues a streamed text-generation request and hands back the raw response
//! body as a byte stream. Framing and decoding happen in `relay::parser`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use serde::Serialize;
use tracing::{debug, error};

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};

pub const DEFAULT_UPSTREAM_URL: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation";

/// Raw response body chunks, in arrival order
pub type ByteStream = BoxStream<'static, RelayResult<Bytes>>;

/// One turn in a replayed conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

/// What the orchestrator asks the provider for
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    /// Latest user prompt
    pub prompt: String,
    /// Provider-side session to continue, if one has been assigned
    pub session_id: Option<String>,
    /// Full history, only under the full-replay policy
    pub messages: Option<Vec<PromptMessage>>,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Start a streamed completion. Errors here mean the request never got a
    /// successful response; errors inside the stream are transport failures.
    async fn stream_completion(&self, request: CompletionRequest) -> RelayResult<ByteStream>;
}

// ============================================================================
// DashScope wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    input: GenerationInput<'a>,
    parameters: GenerationParameters,
}

#[derive(Debug, Serialize)]
struct GenerationInput<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<&'a [PromptMessage]>,
}

#[derive(Debug, Serialize)]
struct GenerationParameters {
    /// Every frame carries the full text so far
    incremental_output: bool,
    has_thoughts: bool,
}

impl<'a> GenerationRequest<'a> {
    fn from_completion(request: &'a CompletionRequest) -> Self {
        Self {
            input: GenerationInput {
                prompt: &request.prompt,
                session_id: request.session_id.as_deref(),
                messages: request.messages.as_deref(),
            },
            parameters: GenerationParameters {
                incremental_output: false,
                has_thoughts: true,
            },
        }
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct DashScopeClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl DashScopeClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.upstream_url.clone(), config.upstream_api_key.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl UpstreamClient for DashScopeClient {
    async fn stream_completion(&self, request: CompletionRequest) -> RelayResult<ByteStream> {
        let body = GenerationRequest::from_completion(&request);
        debug!(
            url = %self.url,
            session_id = ?request.session_id,
            replayed = request.messages.as_ref().map_or(0, Vec::len),
            "Dispatching upstream request"
        );

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .header("X-DashScope-SSE", "enable")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Upstream request failed");
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(RelayError::from))
            .boxed())
    }
}
