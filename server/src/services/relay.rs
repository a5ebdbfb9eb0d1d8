//! Completion relay: conversation in, framed delta stream out.
//!
//! DESIGN
//! ======
//! `parse_request` validates the inbound body before any provider call.
//! `start_relay` opens the provider stream under a wall-clock deadline and
//! returns a lazy stream of encoded `frames` lines. Nothing is buffered:
//! each provider delta becomes exactly one text line, pulled only when the
//! HTTP body is polled. Dropping the returned stream (client disconnect)
//! drops the provider response with it.
//!
//! Failures before the provider accepts the request are returned as
//! `RelayError` so the route can answer with a status code. Failures after
//! the first line has been produced are written as a terminal error line.

use std::pin::Pin;
use std::time::Duration;

use frames::{ChatRequest, ErrorBody, ErrorKind, StreamPart, Usage, encode_part};
use futures::{Stream, StreamExt};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::llm::LlmChat;
use crate::llm::types::{DeltaStream, LlmError, Message, StreamEvent};

/// Fixed instruction placed ahead of every conversation.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

const DEFAULT_RELAY_MAX_DURATION_SECS: u64 = 30;
const DEFAULT_RELAY_MAX_TOKENS: u32 = 1024;

/// Encoded response lines, one `frames` part each.
pub type FrameStream = Pin<Box<dyn Stream<Item = String> + Send>>;

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Ceiling on wall-clock time for the whole request, stream included.
    pub max_duration: Duration,
    pub max_tokens: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(DEFAULT_RELAY_MAX_DURATION_SECS),
            max_tokens: DEFAULT_RELAY_MAX_TOKENS,
        }
    }
}

impl RelayConfig {
    /// Read `RELAY_MAX_DURATION_SECS` and `RELAY_MAX_TOKENS`, falling back to
    /// defaults for absent, unparsable, or zero values.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = lookup("RELAY_MAX_DURATION_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_RELAY_MAX_DURATION_SECS);
        let max_tokens = lookup("RELAY_MAX_TOKENS")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_RELAY_MAX_TOKENS);
        Self { max_duration: Duration::from_secs(secs), max_tokens }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("LLM not configured")]
    Unavailable,
    #[error("upstream failure: {0}")]
    Upstream(#[from] LlmError),
    #[error("relay exceeded its {}s execution bound", .0.as_secs())]
    Timeout(Duration),
}

impl RelayError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedRequest(_) => ErrorKind::MalformedRequest,
            Self::Unavailable => ErrorKind::Unavailable,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Client-facing body. Provider response bodies never leave the server;
    /// `LlmError`'s display carries only the status.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody { code: self.kind(), message: self.to_string() }
    }
}

// =============================================================================
// REQUEST
// =============================================================================

/// Validate an inbound body into provider messages.
///
/// Only `role` and `content` are read; anything else on a message is ignored.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] for undecodable JSON, unknown
/// roles, or an empty message list.
pub fn parse_request(body: &[u8]) -> Result<Vec<Message>, RelayError> {
    let request: ChatRequest =
        serde_json::from_slice(body).map_err(|e| RelayError::MalformedRequest(e.to_string()))?;
    if request.messages.is_empty() {
        return Err(RelayError::MalformedRequest("messages must not be empty".into()));
    }
    Ok(request.messages.iter().map(Message::from).collect())
}

// =============================================================================
// RELAY
// =============================================================================

/// Open the provider stream and return the framed response body.
///
/// The deadline starts now and covers both the provider handshake and every
/// subsequent delta.
///
/// # Errors
///
/// Returns [`RelayError::Upstream`] if the provider rejects the request and
/// [`RelayError::Timeout`] if it does not answer before the deadline.
pub async fn start_relay(
    llm: &dyn LlmChat,
    config: RelayConfig,
    messages: &[Message],
    request_id: Uuid,
) -> Result<FrameStream, RelayError> {
    let deadline = Instant::now() + config.max_duration;
    info!(%request_id, message_count = messages.len(), "relay: opening provider stream");

    let upstream = timeout_at(deadline, llm.chat_stream(config.max_tokens, SYSTEM_PROMPT, messages))
        .await
        .map_err(|_| RelayError::Timeout(config.max_duration))?
        .inspect_err(|e| log_provider_body(request_id, e))?;

    let message_id = Uuid::new_v4().to_string();
    Ok(relay_frames(upstream, deadline, config.max_duration, message_id, request_id))
}

/// Provider bodies go to the server log only; clients get [`RelayError::body`].
fn log_provider_body(request_id: Uuid, err: &LlmError) {
    if let Some(body) = err.provider_body() {
        debug!(%request_id, provider_body = body, "relay: provider rejected request");
    }
}

enum Phase {
    Start(String),
    Streaming,
    Done,
}

struct RelayState {
    upstream: DeltaStream,
    deadline: Instant,
    max_duration: Duration,
    phase: Phase,
    guard: DisconnectGuard,
}

impl RelayState {
    fn terminate(&mut self, part: &StreamPart) -> String {
        self.phase = Phase::Done;
        self.guard.completed = true;
        encode_part(part)
    }

    fn fail(&mut self, kind: ErrorKind, message: String) -> String {
        warn!(
            request_id = %self.guard.request_id,
            code = kind.code(),
            deltas = self.guard.deltas,
            elapsed_ms = self.guard.elapsed_ms(),
            error = %message,
            "relay: stream terminated abnormally"
        );
        self.terminate(&StreamPart::Error(ErrorBody { code: kind, message }))
    }
}

/// Frame a provider stream: one start line, one text line per non-empty
/// delta, then exactly one terminal line.
pub(crate) fn relay_frames(
    upstream: DeltaStream,
    deadline: Instant,
    max_duration: Duration,
    message_id: String,
    request_id: Uuid,
) -> FrameStream {
    let state = RelayState {
        upstream,
        deadline,
        max_duration,
        phase: Phase::Start(message_id),
        guard: DisconnectGuard::new(request_id),
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        match std::mem::replace(&mut st.phase, Phase::Streaming) {
            Phase::Start(message_id) => {
                return Some((encode_part(&StreamPart::Start { message_id }), st));
            }
            Phase::Done => {
                st.phase = Phase::Done;
                return None;
            }
            Phase::Streaming => {}
        }

        loop {
            let Ok(next) = timeout_at(st.deadline, st.upstream.next()).await else {
                let message = RelayError::Timeout(st.max_duration).to_string();
                let line = st.fail(ErrorKind::Timeout, message);
                return Some((line, st));
            };

            match next {
                Some(Ok(StreamEvent::Delta(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    st.guard.deltas += 1;
                    return Some((encode_part(&StreamPart::Text(text)), st));
                }
                Some(Ok(StreamEvent::Finished(info))) => {
                    info!(
                        request_id = %st.guard.request_id,
                        deltas = st.guard.deltas,
                        finish_reason = %info.stop_reason,
                        prompt_tokens = info.input_tokens,
                        completion_tokens = info.output_tokens,
                        elapsed_ms = st.guard.elapsed_ms(),
                        "relay: stream completed"
                    );
                    let part = StreamPart::Finish {
                        finish_reason: info.stop_reason,
                        usage: Usage { prompt_tokens: info.input_tokens, completion_tokens: info.output_tokens },
                    };
                    let line = st.terminate(&part);
                    return Some((line, st));
                }
                Some(Err(e)) => {
                    let line = st.fail(ErrorKind::Upstream, RelayError::Upstream(e).to_string());
                    return Some((line, st));
                }
                None => {
                    let message = RelayError::Upstream(LlmError::StreamTruncated).to_string();
                    let line = st.fail(ErrorKind::Upstream, message);
                    return Some((line, st));
                }
            }
        }
    }))
}

/// Logs when the response body is dropped before a terminal line was
/// produced, i.e. the client went away mid-stream.
struct DisconnectGuard {
    request_id: Uuid,
    started: std::time::Instant,
    deltas: usize,
    completed: bool,
}

impl DisconnectGuard {
    fn new(request_id: Uuid) -> Self {
        Self { request_id, started: std::time::Instant::now(), deltas: 0, completed: false }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.completed {
            info!(
                request_id = %self.request_id,
                deltas = self.deltas,
                elapsed_ms = self.elapsed_ms(),
                "relay: client disconnected; dropping provider stream"
            );
        }
    }
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
