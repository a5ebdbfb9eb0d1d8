//! LLM: multi-provider streaming adapter for the chat relay.
//!
//! DESIGN
//! ======
//! Configured from environment variables. The `LlmClient` dispatches to
//! Anthropic or `OpenAI` based on `LLM_PROVIDER`; both providers speak SSE
//! and are normalized by [`sse`] into one [`types::DeltaStream`] shape.

pub mod anthropic;
pub mod config;
pub mod openai;
pub mod sse;
pub mod types;

use config::{LlmConfig, LlmProviderKind};
pub use types::LlmChat;
use types::{DeltaStream, LlmError, Message};

// =============================================================================
// CLIENT DISPATCH
// =============================================================================

/// Concrete LLM client that dispatches to either Anthropic or `OpenAI`.
pub struct LlmClient {
    inner: LlmProvider,
    model: String,
}

enum LlmProvider {
    Anthropic(anthropic::AnthropicClient),
    OpenAi(openai::OpenAiClient),
}

impl LlmClient {
    /// Build an LLM client from environment variables. See
    /// [`LlmConfig::from_env`] for the variables read.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing or the HTTP client fails.
    pub fn from_env() -> Result<Self, LlmError> {
        let config = LlmConfig::from_env()?;
        Self::from_config(config)
    }

    /// Build an LLM client from a parsed typed config.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider HTTP client fails to build.
    pub fn from_config(config: LlmConfig) -> Result<Self, LlmError> {
        let model = config.model.clone();
        let inner = match config.provider {
            LlmProviderKind::Anthropic => LlmProvider::Anthropic(anthropic::AnthropicClient::new(
                config.api_key,
                config.anthropic_base_url,
                config.connect_timeout_secs,
            )?),
            LlmProviderKind::OpenAi => LlmProvider::OpenAi(openai::OpenAiClient::new(
                config.api_key,
                config.openai_mode,
                config.openai_base_url,
                config.connect_timeout_secs,
            )?),
        };
        Ok(Self { inner, model })
    }

    /// Return the configured model name (e.g. `"gpt-4o-mini"`).
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn provider(&self) -> LlmProviderKind {
        match self.inner {
            LlmProvider::Anthropic(_) => LlmProviderKind::Anthropic,
            LlmProvider::OpenAi(_) => LlmProviderKind::OpenAi,
        }
    }
}

#[async_trait::async_trait]
impl LlmChat for LlmClient {
    async fn chat_stream(&self, max_tokens: u32, system: &str, messages: &[Message]) -> Result<DeltaStream, LlmError> {
        match &self.inner {
            LlmProvider::Anthropic(c) => c.chat_stream(&self.model, max_tokens, system, messages).await,
            LlmProvider::OpenAi(c) => c.chat_stream(&self.model, max_tokens, system, messages).await,
        }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
