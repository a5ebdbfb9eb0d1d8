//! OpenAI-compatible streaming client.
//!
//! Supports both `/v1/chat/completions` and `/v1/responses` endpoints in
//! streaming mode. Event translation lives in two small [`SseParser`]
//! implementations so it can be tested without a network.

use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;

use super::config::OpenAiApiMode;
use super::sse::{SseEvent, SseParser, event_stream};
use super::types::{DeltaStream, FinishInfo, LlmError, Message, StreamEvent, redact_secret};

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    mode: OpenAiApiMode,
}

impl OpenAiClient {
    /// Build a client. No whole-request timeout is set on the HTTP client;
    /// the relay enforces its own execution bound around the stream.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::HttpClientBuild`] if the HTTP client cannot be built.
    pub fn new(api_key: String, mode: OpenAiApiMode, base_url: String, connect_timeout_secs: u64) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, api_key, base_url, mode })
    }

    pub async fn chat_stream(
        &self,
        model: &str,
        max_tokens: u32,
        system: &str,
        messages: &[Message],
    ) -> Result<DeltaStream, LlmError> {
        match self.mode {
            OpenAiApiMode::ChatCompletions => {
                let msgs = build_chat_completions_messages(system, messages);
                let body = CcRequest {
                    model,
                    max_tokens,
                    messages: &msgs,
                    stream: true,
                    stream_options: CcStreamOptions { include_usage: true },
                };
                let response = self.send_json("/chat/completions", &body).await?;
                Ok(event_stream(response.bytes_stream().boxed(), ChatCompletionsParser::default()))
            }
            OpenAiApiMode::Responses => {
                let input = build_responses_input(messages);
                let body = RespRequest { model, max_output_tokens: max_tokens, instructions: system, input: &input, stream: true };
                let response = self.send_json("/responses", &body).await?;
                Ok(event_stream(response.bytes_stream().boxed(), ResponsesParser))
            }
        }
    }

    async fn send_json(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::ApiRequest(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiResponse { status, body: redact_secret(&text, &self.api_key) });
        }
        Ok(response)
    }
}

// =============================================================================
// CHAT COMPLETIONS WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct CcRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [CcMessage<'a>],
    stream: bool,
    stream_options: CcStreamOptions,
}

#[derive(Serialize)]
struct CcStreamOptions {
    include_usage: bool,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
struct CcMessage<'a> {
    role: &'a str,
    content: &'a str,
}

fn build_chat_completions_messages<'a>(system: &'a str, messages: &'a [Message]) -> Vec<CcMessage<'a>> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system.trim().is_empty() {
        out.push(CcMessage { role: "system", content: system });
    }
    out.extend(messages.iter().map(|m| CcMessage { role: &m.role, content: &m.content }));
    out
}

/// Translates chat-completion chunks. Content arrives in `choices[0].delta`,
/// the finish reason on the last content chunk, usage on a trailing chunk with
/// empty `choices`, and the stream ends with `data: [DONE]`.
#[derive(Debug, Default)]
pub(crate) struct ChatCompletionsParser {
    finish_reason: Option<String>,
    input_tokens: u64,
    output_tokens: u64,
}

impl SseParser for ChatCompletionsParser {
    fn on_event(&mut self, event: &SseEvent) -> Result<Option<StreamEvent>, LlmError> {
        let data = event.data.trim();
        if data.is_empty() {
            return Ok(None);
        }
        if data == "[DONE]" {
            return Ok(Some(StreamEvent::Finished(FinishInfo {
                stop_reason: self.finish_reason.take().unwrap_or_else(|| "stop".to_owned()),
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            })));
        }

        let root: Value = serde_json::from_str(data).map_err(|e| LlmError::ApiParse(e.to_string()))?;
        if let Some(err) = root.get("error") {
            return Err(LlmError::ApiStream(error_message(err)));
        }
        if let Some(usage) = root.get("usage").filter(|u| !u.is_null()) {
            self.input_tokens = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
            self.output_tokens = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
        }

        let Some(choice) = root
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
        else {
            return Ok(None);
        };
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_owned());
        }
        let delta = choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if delta.is_empty() {
            return Ok(None);
        }
        Ok(Some(StreamEvent::Delta(delta.to_owned())))
    }
}

// =============================================================================
// RESPONSES WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct RespRequest<'a> {
    model: &'a str,
    max_output_tokens: u32,
    instructions: &'a str,
    input: &'a [RespInputItem<'a>],
    stream: bool,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
struct RespInputItem<'a> {
    #[serde(rename = "type")]
    item_type: &'static str,
    role: &'a str,
    content: Vec<RespTextContent<'a>>,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
struct RespTextContent<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    text: &'a str,
}

fn build_responses_input(messages: &[Message]) -> Vec<RespInputItem<'_>> {
    messages
        .iter()
        .map(|m| {
            // Prior assistant turns are model output, not input text.
            let content_type = if m.role == "assistant" { "output_text" } else { "input_text" };
            RespInputItem {
                item_type: "message",
                role: &m.role,
                content: vec![RespTextContent { content_type, text: &m.content }],
            }
        })
        .collect()
}

/// Translates Responses API events, keyed on the payload's `type` field.
#[derive(Debug, Default)]
pub(crate) struct ResponsesParser;

impl SseParser for ResponsesParser {
    fn on_event(&mut self, event: &SseEvent) -> Result<Option<StreamEvent>, LlmError> {
        if event.data.trim().is_empty() {
            return Ok(None);
        }
        let root: Value = serde_json::from_str(&event.data).map_err(|e| LlmError::ApiParse(e.to_string()))?;
        let kind = root
            .get("type")
            .and_then(Value::as_str)
            .or(event.event.as_deref())
            .unwrap_or_default();

        match kind {
            "response.output_text.delta" => {
                let delta = root.get("delta").and_then(Value::as_str).unwrap_or_default();
                if delta.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(StreamEvent::Delta(delta.to_owned())))
                }
            }
            "response.completed" | "response.incomplete" => {
                let response = root.get("response").cloned().unwrap_or(Value::Null);
                let usage = response.get("usage").cloned().unwrap_or(Value::Null);
                let stop_reason = if kind == "response.completed" {
                    "stop".to_owned()
                } else {
                    response
                        .get("incomplete_details")
                        .and_then(|d| d.get("reason"))
                        .and_then(Value::as_str)
                        .unwrap_or("incomplete")
                        .to_owned()
                };
                Ok(Some(StreamEvent::Finished(FinishInfo {
                    stop_reason,
                    input_tokens: usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
                    output_tokens: usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
                })))
            }
            "response.failed" => {
                let err = root
                    .get("response")
                    .and_then(|r| r.get("error"))
                    .map_or_else(|| "response failed".to_owned(), error_message);
                Err(LlmError::ApiStream(err))
            }
            "error" => Err(LlmError::ApiStream(error_message(&root))),
            _ => Ok(None),
        }
    }
}

fn error_message(err: &Value) -> String {
    err.get("message")
        .and_then(Value::as_str)
        .map_or_else(|| err.to_string(), str::to_owned)
}

#[cfg(test)]
#[path = "openai_test.rs"]
mod tests;
