//! Shared chat request types and the line-oriented delta stream codec.
//!
//! This crate owns the wire representation used by both `server` and `client`.
//! The request body is plain JSON; the response body is a sequence of
//! newline-terminated parts, each `<code>:<json>`:
//!
//! ```text
//! f:{"messageId":"msg-1"}
//! 0:"We're"
//! 0:" open"
//! d:{"finishReason":"stop","usage":{"promptTokens":12,"completionTokens":3}}
//! ```
//!
//! A stream ends cleanly with a `d` part, abnormally with a `3` part. Anything
//! else (connection closed before either) is a truncated stream.

use serde::{Deserialize, Serialize};

/// Response header announcing the framing version.
pub const STREAM_HEADER: &str = "x-chat-stream";

/// Current framing version, sent as the value of [`STREAM_HEADER`].
pub const STREAM_VERSION: &str = "v1";

/// Content type of a framed response body.
pub const STREAM_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Error returned by [`decode_line`] and [`LineDecoder`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The line has no `<code>:` prefix.
    #[error("frame line missing type prefix: {0:?}")]
    MissingPrefix(String),
    /// The prefix is not a known part code.
    #[error("unknown frame part code: {0:?}")]
    UnknownCode(String),
    /// The payload after the prefix is not valid JSON for its part.
    #[error("invalid frame payload: {0}")]
    Payload(#[from] serde_json::Error),
}

// =============================================================================
// REQUEST BODY
// =============================================================================

/// Author of a chat message. Only these two roles are accepted inbound; the
/// system instruction is added by the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message of the conversation history as sent to the relay.
///
/// Unknown fields (ids, flags) are ignored when deserializing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Body of `POST /api/chat`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Failure taxonomy shared by the error part and error response bodies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The inbound message list was invalid. Not retryable as-is.
    #[serde(rename = "E_MALFORMED_REQUEST")]
    MalformedRequest,
    /// The model provider errored or dropped the stream.
    #[serde(rename = "E_UPSTREAM")]
    Upstream,
    /// The relay execution bound was exceeded.
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    /// The relay has no model provider configured.
    #[serde(rename = "E_UNAVAILABLE")]
    Unavailable,
}

impl ErrorKind {
    /// Grepable code string, identical to the serialized form.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::MalformedRequest => "E_MALFORMED_REQUEST",
            Self::Upstream => "E_UPSTREAM",
            Self::Timeout => "E_TIMEOUT",
            Self::Unavailable => "E_UNAVAILABLE",
        }
    }
}

/// JSON body of a non-streaming error response (and payload of the error part).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorKind,
    pub message: String,
}

// =============================================================================
// STREAM PARTS
// =============================================================================

/// Token accounting reported in the finish part.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A single line of the response stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamPart {
    /// First part of every stream; carries the server-assigned message id.
    Start { message_id: String },
    /// An incremental text fragment.
    Text(String),
    /// Abnormal terminal part.
    Error(ErrorBody),
    /// Clean terminal part.
    Finish { finish_reason: String, usage: Usage },
}

impl StreamPart {
    /// `true` for the two parts that end a stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Finish { .. })
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Start { .. } => "f",
            Self::Text(_) => "0",
            Self::Error(_) => "3",
            Self::Finish { .. } => "d",
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPayload {
    message_id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishPayload {
    finish_reason: String,
    #[serde(default)]
    usage: Usage,
}

/// Encode a part as one newline-terminated line.
#[must_use]
pub fn encode_part(part: &StreamPart) -> String {
    // Serializing these payloads cannot fail: plain strings, integers and
    // derive-generated structs with no maps keyed by non-strings.
    let payload = match part {
        StreamPart::Start { message_id } => {
            serde_json::to_string(&StartPayload { message_id: message_id.clone() })
        }
        StreamPart::Text(text) => serde_json::to_string(text),
        StreamPart::Error(body) => serde_json::to_string(body),
        StreamPart::Finish { finish_reason, usage } => {
            serde_json::to_string(&FinishPayload { finish_reason: finish_reason.clone(), usage: *usage })
        }
    }
    .unwrap_or_default();
    format!("{}:{payload}\n", part.code())
}

/// Decode a single line (with or without its trailing newline).
///
/// # Errors
///
/// Returns [`CodecError::MissingPrefix`] when there is no `:` separator,
/// [`CodecError::UnknownCode`] for an unrecognized part code, and
/// [`CodecError::Payload`] when the JSON payload does not match the part.
pub fn decode_line(line: &str) -> Result<StreamPart, CodecError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some((code, payload)) = line.split_once(':') else {
        return Err(CodecError::MissingPrefix(line.to_owned()));
    };
    match code {
        "f" => {
            let start: StartPayload = serde_json::from_str(payload)?;
            Ok(StreamPart::Start { message_id: start.message_id })
        }
        "0" => Ok(StreamPart::Text(serde_json::from_str(payload)?)),
        "3" => Ok(StreamPart::Error(serde_json::from_str(payload)?)),
        "d" => {
            let finish: FinishPayload = serde_json::from_str(payload)?;
            Ok(StreamPart::Finish { finish_reason: finish.finish_reason, usage: finish.usage })
        }
        other => Err(CodecError::UnknownCode(other.to_owned())),
    }
}

// =============================================================================
// INCREMENTAL DECODER
// =============================================================================

/// Reassembles stream parts from arbitrarily split body chunks.
///
/// Splits on the `\n` byte before UTF-8 decoding, so a multi-byte character
/// cut across two chunks is never mangled.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every part completed by it, in order. Blank
    /// lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamPart, CodecError>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            if text.trim().is_empty() {
                continue;
            }
            out.push(decode_line(&text));
        }
        out
    }

    /// Flush a final unterminated line at end of body, if any.
    pub fn finish(&mut self) -> Option<Result<StreamPart, CodecError>> {
        let rest = std::mem::take(&mut self.buf);
        let text = String::from_utf8_lossy(&rest);
        if text.trim().is_empty() {
            return None;
        }
        Some(decode_line(&text))
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
