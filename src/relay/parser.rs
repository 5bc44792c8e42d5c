//! Incremental SSE frame parser
//!
//! Upstream bytes arrive in chunks that have nothing to do with frame
//! boundaries. `FrameParser` keeps a byte buffer, cuts it at every `\n\n`
//! terminator and decodes one JSON payload per complete frame. A payload that
//! does not parse is held back and joined with the next frame, which covers
//! payloads that themselves contain a blank line.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::error::RelayError;

/// Upper bound for a withheld (not yet parseable) payload
pub const MAX_PENDING_BYTES: usize = 1024 * 1024;

const FRAME_TERMINATOR: &[u8] = b"\n\n";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: BytesMut,
    pending: Option<String>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every payload completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        // CR bytes only ever appear as line endings; JSON escapes them inside strings.
        self.buffer.reserve(chunk.len());
        self.buffer
            .extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(pos) = find_terminator(&self.buffer) {
            let segment = self.buffer.split_to(pos + FRAME_TERMINATOR.len());
            if let Some(value) = self.complete_segment(&segment[..pos]) {
                payloads.push(value);
            }
        }
        payloads
    }

    /// Flush at end of input. An unterminated tail is yielded only if it is valid JSON.
    pub fn finish(&mut self) -> Option<Value> {
        let tail = self.buffer.split();
        let value = if tail.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            self.complete_segment(&tail)
        };

        if let Some(stale) = self.pending.take() {
            debug!(bytes = stale.len(), "Discarding unparsed payload at end of stream");
        }
        value
    }

    /// Bytes waiting for a terminator
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a malformed payload is currently withheld
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn complete_segment(&mut self, segment: &[u8]) -> Option<Value> {
        let text = String::from_utf8_lossy(segment);
        let continuing = self.pending.is_some();
        let payload = extract_payload(&text, continuing)?;

        if !continuing && payload.trim() == DONE_SENTINEL {
            return None;
        }

        match self.pending.take() {
            Some(stale) => {
                let joined = format!("{}\n\n{}", stale, payload);
                if let Ok(value) = serde_json::from_str(&joined) {
                    return Some(value);
                }
                if let Ok(value) = serde_json::from_str(&payload) {
                    debug!(bytes = stale.len(), "Dropping malformed frame superseded by a valid one");
                    return Some(value);
                }
                self.hold(joined);
                None
            }
            None => match serde_json::from_str(&payload) {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!(error = %e, "Withholding frame until more data arrives");
                    self.hold(payload);
                    None
                }
            },
        }
    }

    fn hold(&mut self, payload: String) {
        if payload.len() > MAX_PENDING_BYTES {
            debug!(bytes = payload.len(), "Withheld payload too large, discarding");
            return;
        }
        self.pending = Some(payload);
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_TERMINATOR.len())
        .position(|window| window == FRAME_TERMINATOR)
}

fn is_field_line(line: &str) -> bool {
    line.starts_with(':')
        || line.starts_with("id:")
        || line.starts_with("event:")
        || line.starts_with("retry:")
}

/// Pull the payload out of one frame.
///
/// The first `data:` line starts it; later `data:` lines and bare lines are
/// appended with `\n`. With `continuing` set, bare lines before any `data:`
/// line also count, since they belong to a payload split by a blank line.
fn extract_payload(frame: &str, continuing: bool) -> Option<String> {
    let mut payload: Option<String> = None;

    for line in frame.split('\n') {
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            match payload.as_mut() {
                Some(p) => {
                    p.push('\n');
                    p.push_str(rest);
                }
                None => payload = Some(rest.to_string()),
            }
        } else if line.is_empty() || is_field_line(line) {
            continue;
        } else if let Some(p) = payload.as_mut() {
            p.push('\n');
            p.push_str(line);
        } else if continuing {
            payload = Some(line.to_string());
        }
    }

    payload
}

/// Turn a byte stream into a lazy stream of decoded payloads.
///
/// Transport errors end the stream after being yielded once. Dropping the
/// returned stream drops the underlying byte stream.
pub fn frames<S>(bytes: S) -> impl Stream<Item = Result<Value, RelayError>> + Send
where
    S: Stream<Item = Result<Bytes, RelayError>> + Send + 'static,
{
    async_stream::try_stream! {
        let mut parser = FrameParser::new();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for value in parser.feed(&chunk) {
                yield value;
            }
        }

        if let Some(value) = parser.finish() {
            yield value;
        }
    }
}
