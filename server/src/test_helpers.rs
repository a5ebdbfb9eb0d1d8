//! Shared fixtures for relay and route tests.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::llm::LlmChat;
use crate::llm::types::{DeltaStream, FinishInfo, LlmError, Message, StreamEvent};

/// Scripted provider. Yields `script` in order, then either ends or hangs.
pub struct MockLlm {
    pub script: Mutex<Option<Vec<Result<StreamEvent, LlmError>>>>,
    pub reject: Mutex<Option<LlmError>>,
    pub open_delay: Option<Duration>,
    pub hang_after_script: bool,
    pub dropped: Arc<AtomicBool>,
    pub seen: Mutex<Option<(String, Vec<Message>)>>,
}

impl MockLlm {
    #[must_use]
    pub fn new(script: Vec<Result<StreamEvent, LlmError>>) -> Self {
        Self {
            script: Mutex::new(Some(script)),
            reject: Mutex::new(None),
            open_delay: None,
            hang_after_script: false,
            dropped: Arc::new(AtomicBool::new(false)),
            seen: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn rejecting(err: LlmError) -> Self {
        let mock = Self::new(Vec::new());
        *mock.reject.lock().unwrap() = Some(err);
        mock
    }

    /// `true` once nothing holds the provider stream any more.
    #[must_use]
    pub fn stream_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn was_called(&self) -> bool {
        self.seen.lock().unwrap().is_some()
    }
}

/// Marks `dropped` when the relay lets go of the provider stream.
struct Tracked {
    inner: DeltaStream,
    dropped: Arc<AtomicBool>,
}

impl Stream for Tracked {
    type Item = Result<StreamEvent, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl LlmChat for MockLlm {
    async fn chat_stream(&self, _max_tokens: u32, system: &str, messages: &[Message]) -> Result<DeltaStream, LlmError> {
        *self.seen.lock().unwrap() = Some((system.to_owned(), messages.to_vec()));
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        let reject = self.reject.lock().unwrap().take();
        if let Some(err) = reject {
            return Err(err);
        }
        let script = self.script.lock().unwrap().take().unwrap_or_default();
        let scripted = futures::stream::iter(script);
        let inner: DeltaStream = if self.hang_after_script {
            Box::pin(scripted.chain(futures::stream::pending()))
        } else {
            Box::pin(scripted)
        };
        Ok(Box::pin(Tracked { inner, dropped: self.dropped.clone() }))
    }
}

#[must_use]
pub fn delta(text: &str) -> Result<StreamEvent, LlmError> {
    Ok(StreamEvent::Delta(text.into()))
}

#[must_use]
pub fn finished() -> Result<StreamEvent, LlmError> {
    Ok(StreamEvent::Finished(FinishInfo { stop_reason: "stop".into(), input_tokens: 9, output_tokens: 4 }))
}

#[must_use]
pub fn user(content: &str) -> Message {
    Message { role: "user".into(), content: content.into() }
}
