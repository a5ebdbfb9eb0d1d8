//! HTTP client for the completion relay.
//!
//! SYSTEM CONTEXT
//! ==============
//! `CompletionRelay` is the session's only suspending dependency. It turns a
//! conversation into a lazy [`DeltaStream`] of text fragments:
//!
//! - `Ok(text)` for each delta, in arrival order;
//! - end of stream after a clean finish part;
//! - one `Err` and then end of stream for an error part, a transport
//!   failure, or a body that stops without any terminal part.
//!
//! Dropping the stream drops the HTTP response, which closes the connection.

use std::collections::VecDeque;
use std::fmt::Display;

use frames::{ChatMessage, ChatRequest, ErrorBody, ErrorKind, LineDecoder, StreamPart};
use futures::stream::LocalBoxStream;
use futures::{Stream, StreamExt};

/// Lazily pulled text deltas for one assistant turn.
pub type DeltaStream = LocalBoxStream<'static, Result<String, RelayError>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("request rejected: {0}")]
    MalformedRequest(String),
    #[error("the model failed: {0}")]
    Upstream(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("chat is unavailable: {0}")]
    Unavailable(String),
    #[error("response ended before completion")]
    Truncated,
    #[error("network error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl From<ErrorBody> for RelayError {
    fn from(body: ErrorBody) -> Self {
        match body.code {
            ErrorKind::MalformedRequest => Self::MalformedRequest(body.message),
            ErrorKind::Upstream => Self::Upstream(body.message),
            ErrorKind::Timeout => Self::Timeout(body.message),
            ErrorKind::Unavailable => Self::Unavailable(body.message),
        }
    }
}

/// Streaming completion capability.
#[async_trait::async_trait(?Send)]
pub trait CompletionRelay {
    /// Send the full conversation and return its delta stream.
    ///
    /// # Errors
    ///
    /// Returns a [`RelayError`] when the relay refuses the request before
    /// streaming (bad request, provider down, timeout) or is unreachable.
    async fn open(&self, messages: &[ChatMessage]) -> Result<DeltaStream, RelayError>;
}

// =============================================================================
// HTTP
// =============================================================================

/// `POST {base}/api/chat` over `reqwest` (fetch in the browser).
#[derive(Debug, Clone)]
pub struct HttpRelay {
    http: reqwest::Client,
    url: String,
}

impl HttpRelay {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self { http: reqwest::Client::new(), url: format!("{}/api/chat", base_url.trim_end_matches('/')) }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait(?Send)]
impl CompletionRelay for HttpRelay {
    async fn open(&self, messages: &[ChatMessage]) -> Result<DeltaStream, RelayError> {
        let body = ChatRequest { messages: messages.to_vec() };
        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(serde_json::from_str::<ErrorBody>(&text)
                .map_or_else(|_| RelayError::Protocol(format!("status {status}")), RelayError::from));
        }

        Ok(decode_delta_stream(resp.bytes_stream()))
    }
}

// =============================================================================
// DECODING
// =============================================================================

struct DecodeState<S> {
    body: S,
    decoder: LineDecoder,
    pending: VecDeque<Result<String, RelayError>>,
    done: bool,
}

impl<S> DecodeState<S> {
    fn absorb(&mut self, part: Result<StreamPart, frames::CodecError>) {
        if self.done {
            return;
        }
        match part {
            Ok(StreamPart::Start { .. }) => {}
            Ok(StreamPart::Text(text)) => {
                if !text.is_empty() {
                    self.pending.push_back(Ok(text));
                }
            }
            Ok(StreamPart::Finish { .. }) => self.done = true,
            Ok(StreamPart::Error(body)) => {
                self.pending.push_back(Err(body.into()));
                self.done = true;
            }
            Err(e) => {
                self.pending.push_back(Err(RelayError::Protocol(e.to_string())));
                self.done = true;
            }
        }
    }
}

/// Decode a framed response body into text deltas.
pub fn decode_delta_stream<S, B, E>(body: S) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + 'static,
    B: AsRef<[u8]> + 'static,
    E: Display + 'static,
{
    let state = DecodeState { body: Box::pin(body), decoder: LineDecoder::new(), pending: VecDeque::new(), done: false };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    for part in st.decoder.push(chunk.as_ref()) {
                        st.absorb(part);
                    }
                }
                Some(Err(e)) => {
                    st.pending.push_back(Err(RelayError::Transport(e.to_string())));
                    st.done = true;
                }
                None => {
                    if let Some(part) = st.decoder.finish() {
                        st.absorb(part);
                    }
                    if !st.done {
                        st.pending.push_back(Err(RelayError::Truncated));
                        st.done = true;
                    }
                }
            }
        }
    })
    .boxed_local()
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
