//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds only read-only configuration: the optional provider client and the
//! relay limits. Requests share no mutable state.

use std::sync::Arc;

use crate::llm::LlmChat;
use crate::services::relay::RelayConfig;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; inner fields are Arc-wrapped or Copy.
#[derive(Clone)]
pub struct AppState {
    /// Optional LLM client. `None` if LLM env vars are not configured.
    pub llm: Option<Arc<dyn LlmChat>>,
    pub relay: RelayConfig,
}

impl AppState {
    #[must_use]
    pub fn new(llm: Option<Arc<dyn LlmChat>>, relay: RelayConfig) -> Self {
        Self { llm, relay }
    }
}

#[cfg(test)]
#[path = "test_helpers.rs"]
pub mod test_helpers;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
