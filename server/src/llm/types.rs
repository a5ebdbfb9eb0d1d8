//! LLM types: provider-neutral messages, stream events and errors.
//!
//! Shared by the Anthropic and `OpenAI` clients. Every provider turns its
//! native server-sent events into the same [`StreamEvent`] sequence: zero or
//! more `Delta`s followed by exactly one `Finished`.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by LLM client operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    ConfigParse(String),

    /// The required API key environment variable is not set.
    #[error("missing API key: env var {var} not set")]
    MissingApiKey { var: String },

    /// The HTTP request to the LLM provider failed (connect, send, or body read).
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// The LLM provider returned a non-success HTTP status.
    #[error("API response error: status {status}")]
    ApiResponse { status: u16, body: String },

    /// A stream event could not be deserialized.
    #[error("API response parse failed: {0}")]
    ApiParse(String),

    /// The provider reported an error inside the event stream.
    #[error("API stream error: {0}")]
    ApiStream(String),

    /// The provider's byte stream ended before its completion event.
    #[error("API stream ended before completion")]
    StreamTruncated,

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl LlmError {
    /// Raw provider response body, for server-side diagnostics only.
    #[must_use]
    pub fn provider_body(&self) -> Option<&str> {
        match self {
            Self::ApiResponse { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// `body` with every occurrence of `secret` masked.
pub(crate) fn redact_secret(body: &str, secret: &str) -> String {
    if secret.is_empty() {
        return body.to_owned();
    }
    body.replace(secret, "[redacted]")
}

// =============================================================================
// MESSAGE TYPES
// =============================================================================

/// A single message in a conversation, as sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl From<&frames::ChatMessage> for Message {
    fn from(msg: &frames::ChatMessage) -> Self {
        Self { role: msg.role.as_str().to_owned(), content: msg.content.clone() }
    }
}

/// Completion metadata reported once the provider finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishInfo {
    pub stop_reason: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One item of a provider stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental text fragment.
    Delta(String),
    /// The provider signalled completion. Always the last item.
    Finished(FinishInfo),
}

/// Lazily pulled provider stream. Dropping it closes the upstream connection.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

// =============================================================================
// LLM CHAT TRAIT
// =============================================================================

/// Provider-neutral async trait for streaming chat. Enables mocking in tests.
#[async_trait::async_trait]
pub trait LlmChat: Send + Sync {
    /// Open a streaming completion for `messages` with `system` prepended.
    ///
    /// Resolves once the provider has accepted the request (status 200);
    /// text then arrives through the returned stream.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the request cannot be sent or the provider
    /// rejects it before streaming starts.
    async fn chat_stream(&self, max_tokens: u32, system: &str, messages: &[Message]) -> Result<DeltaStream, LlmError>;
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
