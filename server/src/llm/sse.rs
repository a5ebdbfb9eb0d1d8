//! Server-sent events decoding shared by all streaming providers.
//!
//! DESIGN
//! ======
//! `SseDecoder` is a pure byte-in / event-out state machine so chunk
//! boundaries can be exercised in tests without a network. `event_stream`
//! drives a decoder over an HTTP body and hands each event to a
//! provider-specific [`SseParser`], producing the neutral [`DeltaStream`].
//!
//! The stream is lazy: bytes are only pulled from the provider when the
//! consumer polls, so dropping the stream stops upstream work.

use std::collections::VecDeque;
use std::fmt::Display;

use futures::{Stream, StreamExt};

use super::types::{DeltaStream, LlmError, StreamEvent};

/// A dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the last `event:` field, if any.
    pub event: Option<String>,
    /// All `data:` fields joined with `\n`.
    pub data: String,
}

/// Incremental SSE line parser.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by a blank line.
    ///
    /// An event still open when the body ends is discarded, matching the
    /// `EventSource` processing model.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    out.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_owned()),
                "data" => self.data.push(value.to_owned()),
                _ => {}
            }
        }
        out
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event: self.event.take(), data })
    }
}

/// Provider-specific translation of SSE events into stream events.
pub trait SseParser: Send + 'static {
    /// Translate one event. `Ok(None)` means the event carries nothing the
    /// relay needs (pings, bookkeeping). Returning [`StreamEvent::Finished`]
    /// ends the stream.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ApiStream`] for provider-reported errors and
    /// [`LlmError::ApiParse`] for undecodable payloads.
    fn on_event(&mut self, event: &SseEvent) -> Result<Option<StreamEvent>, LlmError>;
}

struct EventStreamState<S, P> {
    body: S,
    decoder: SseDecoder,
    parser: P,
    pending: VecDeque<Result<StreamEvent, LlmError>>,
    done: bool,
}

impl<S, P: SseParser> EventStreamState<S, P> {
    /// Run a decoded chunk through the parser, queuing results. Stops at the
    /// first terminal item; anything after it in the chunk is ignored.
    fn absorb(&mut self, chunk: &[u8]) {
        for event in self.decoder.push(chunk) {
            match self.parser.on_event(&event) {
                Ok(None) => {}
                Ok(Some(item @ StreamEvent::Finished(_))) => {
                    self.pending.push_back(Ok(item));
                    self.done = true;
                    return;
                }
                Ok(Some(item)) => self.pending.push_back(Ok(item)),
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.done = true;
                    return;
                }
            }
        }
    }
}

/// Turn an HTTP body into a [`DeltaStream`] using `parser`.
///
/// A body that ends (or errors) before the parser reports completion yields a
/// final `Err` item.
pub fn event_stream<S, B, E, P>(body: S, parser: P) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
    P: SseParser,
{
    let state = EventStreamState { body, decoder: SseDecoder::new(), parser, pending: VecDeque::new(), done: false };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.absorb(chunk.as_ref()),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(LlmError::ApiRequest(e.to_string())), state));
                }
                None => {
                    state.done = true;
                    return Some((Err(LlmError::StreamTruncated), state));
                }
            }
        }
    }))
}

#[cfg(test)]
#[path = "sse_test.rs"]
mod tests;
