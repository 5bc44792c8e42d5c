// tests/test_helpers.rs
// Shared fixtures: a scripted upstream provider and app state wiring

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parley::auth::{AuthService, TokenIssuer};
use parley::relay::{ByteStream, CompletionRequest, UpstreamClient};
use parley::{AppState, RelayConfig, RelayError, RelayResult};

/// `"He"` then `"Hello"` with `finish_reason: stop`
pub const HELLO_FRAMES: [&str; 2] = [
    "id:1\nevent:result\n:HTTP_STATUS/200\ndata:{\"output\":{\"text\":\"He\",\"finish_reason\":null},\"request_id\":\"req-1\"}\n\n",
    "id:2\nevent:result\n:HTTP_STATUS/200\ndata:{\"output\":{\"text\":\"Hello\",\"finish_reason\":\"stop\"},\"request_id\":\"req-1\"}\n\n",
];

/// Upstream stand-in that replays fixed chunks for every request
pub struct ScriptedUpstream {
    chunks: Vec<String>,
    chunk_delay: Option<Duration>,
    refuse_with: Option<u16>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedUpstream {
    pub fn new<S: AsRef<str>>(chunks: &[S]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.as_ref().to_string()).collect(),
            chunk_delay: None,
            refuse_with: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn hello() -> Self {
        Self::new(&HELLO_FRAMES)
    }

    pub fn refusing(status: u16) -> Self {
        Self {
            refuse_with: Some(status),
            ..Self::new::<&str>(&[])
        }
    }

    /// Pause before each chunk, to leave room for subscribers to come and go
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn stream_completion(&self, request: CompletionRequest) -> RelayResult<ByteStream> {
        self.requests.lock().push(request);
        if let Some(status) = self.refuse_with {
            return Err(RelayError::UpstreamStatus {
                status,
                body: "{\"code\":\"InvalidApiKey\"}".into(),
            });
        }

        let delay = self.chunk_delay;
        let chunks = self.chunks.clone();
        let stream = futures::stream::iter(chunks).then(move |chunk| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Bytes::from(chunk))
        });
        Ok(stream.boxed())
    }
}

pub fn test_config(upload_dir: &Path) -> RelayConfig {
    RelayConfig {
        upload_dir: upload_dir.to_path_buf(),
        jwt_secret: "test-secret".to_string(),
        ..Default::default()
    }
}

/// App state with a cheap bcrypt cost
pub fn test_state(config: RelayConfig, upstream: Arc<ScriptedUpstream>) -> Arc<AppState> {
    let auth = AuthService::with_cost(
        TokenIssuer::new(&config.jwt_secret, config.token_ttl_hours),
        4,
    );
    Arc::new(AppState::with_auth(config, upstream, auth))
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// JSON payloads of every `data:` line in an SSE body
pub fn sse_payloads(body: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(body)
        .split("\n\n")
        .flat_map(|frame| frame.lines())
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim_start()).unwrap())
        .collect()
}
