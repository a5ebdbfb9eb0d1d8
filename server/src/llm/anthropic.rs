//! Anthropic Messages API client, streaming mode.
//!
//! Posts to `/v1/messages` with `stream: true` and translates the named
//! events (`message_start`, `content_block_delta`, `message_delta`,
//! `message_stop`, `error`) through [`MessagesParser`].

use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;

use super::sse::{SseEvent, SseParser, event_stream};
use super::types::{DeltaStream, FinishInfo, LlmError, Message, StreamEvent, redact_secret};

const API_VERSION: &str = "2023-06-01";

// =============================================================================
// CLIENT
// =============================================================================

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: String, connect_timeout_secs: u64) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, api_key, base_url })
    }

    pub async fn chat_stream(
        &self,
        model: &str,
        max_tokens: u32,
        system: &str,
        messages: &[Message],
    ) -> Result<DeltaStream, LlmError> {
        let messages = sendable_messages(messages);
        let body = ApiRequest { model, max_tokens, system, messages: &messages, stream: true };

        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ApiRequest(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiResponse { status, body: redact_secret(&text, &self.api_key) });
        }

        Ok(event_stream(response.bytes_stream().boxed(), MessagesParser::default()))
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(serde::Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: &'a [&'a Message],
    stream: bool,
}

/// Messages the Messages API will accept. Blank text blocks are rejected
/// with a 400, so turns that never produced any text are left out.
fn sendable_messages(messages: &[Message]) -> Vec<&Message> {
    messages.iter().filter(|m| !m.content.trim().is_empty()).collect()
}

// =============================================================================
// PARSING
// =============================================================================

#[derive(Debug, Default)]
pub(crate) struct MessagesParser {
    stop_reason: Option<String>,
    input_tokens: u64,
    output_tokens: u64,
}

impl SseParser for MessagesParser {
    fn on_event(&mut self, event: &SseEvent) -> Result<Option<StreamEvent>, LlmError> {
        if event.data.trim().is_empty() {
            return Ok(None);
        }
        let root: Value = serde_json::from_str(&event.data).map_err(|e| LlmError::ApiParse(e.to_string()))?;
        let kind = event
            .event
            .as_deref()
            .or_else(|| root.get("type").and_then(Value::as_str))
            .unwrap_or_default();

        match kind {
            "message_start" => {
                self.input_tokens = root
                    .pointer("/message/usage/input_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                Ok(None)
            }
            "content_block_delta" => {
                let text = root
                    .pointer("/delta/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if text.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(StreamEvent::Delta(text.to_owned())))
                }
            }
            "message_delta" => {
                if let Some(reason) = root.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    self.stop_reason = Some(reason.to_owned());
                }
                if let Some(out) = root.pointer("/usage/output_tokens").and_then(Value::as_u64) {
                    self.output_tokens = out;
                }
                Ok(None)
            }
            "message_stop" => Ok(Some(StreamEvent::Finished(FinishInfo {
                stop_reason: self.stop_reason.take().unwrap_or_else(|| "end_turn".to_owned()),
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            }))),
            "error" => {
                let message = root
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("provider error")
                    .to_owned();
                Err(LlmError::ApiStream(message))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
#[path = "anthropic_test.rs"]
mod tests;
