//! Conversation session: message list, draft input, persisted snapshot.
//!
//! DESIGN
//! ======
//! The session is plain data plus a [`KeyValueStore`]; it knows nothing about
//! Leptos. Components subscribe for change notifications and re-render from
//! the [`SessionView`] they are handed.
//!
//! A turn is split into synchronous steps so the UI can drive it without
//! holding a borrow across an await:
//!
//! 1. [`ConversationSession::begin_submit`] appends the user message and an
//!    empty assistant message and returns the history to send;
//! 2. [`run_turn`] pulls deltas from the relay, handing each to a callback
//!    that calls [`ConversationSession::apply_delta`];
//! 3. [`ConversationSession::finish_turn`] records the outcome and persists.
//!
//! [`ConversationSession::submit`] composes the three for callers that own
//! the session outright.
//!
//! Snapshot writes are retried once. A second failure disables further
//! writes and leaves a user-visible warning; the conversation carries on in
//! memory.

use frames::{ChatMessage, Role};
use futures::StreamExt;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use leptos::logging::{log, warn};
use serde::{Deserialize, Serialize};

use crate::net::relay::{CompletionRelay, RelayError};
use crate::util::storage::{KeyValueStore, StorageError, load_json, save_json};

/// Storage key of the persisted conversation.
pub const STORAGE_KEY: &str = "chatMessages";

const CANCELLED: &str = "cancelled";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Set when the assistant stream ended abnormally or never finished.
    #[serde(default)]
    pub incomplete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    fn new(role: Role, content: &str) -> Self {
        Self { id: uuid::Uuid::new_v4().to_string(), role, content: content.to_owned(), incomplete: false, error: None }
    }

    fn to_wire(&self) -> ChatMessage {
        ChatMessage { role: self.role, content: self.content.clone() }
    }
}

/// How a turn ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed(RelayError),
    Cancelled,
}

/// A turn that has been started but not yet streamed.
#[derive(Debug)]
pub struct PendingTurn {
    /// Id of the assistant message receiving deltas.
    pub assistant_id: String,
    /// Conversation to send, ending with the new user message.
    pub history: Vec<ChatMessage>,
    /// Fires when the session cancels or clears this turn.
    pub abort: AbortRegistration,
}

/// Read-only view handed to observers.
#[derive(Clone, Copy, Debug)]
pub struct SessionView<'a> {
    pub messages: &'a [Message],
    pub draft: &'a str,
    pub streaming: bool,
    pub persistence_warning: Option<&'a str>,
}

/// Owned copy of a [`SessionView`], for reactive UI state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub messages: Vec<Message>,
    pub draft: String,
    pub streaming: bool,
    pub persistence_warning: Option<String>,
}

impl From<&SessionView<'_>> for ChatSnapshot {
    fn from(view: &SessionView<'_>) -> Self {
        Self {
            messages: view.messages.to_vec(),
            draft: view.draft.to_owned(),
            streaming: view.streaming,
            persistence_warning: view.persistence_warning.map(str::to_owned),
        }
    }
}

pub type ObserverId = usize;

type Observer = Box<dyn Fn(&SessionView<'_>)>;

// =============================================================================
// SESSION
// =============================================================================

pub struct ConversationSession<S: KeyValueStore> {
    messages: Vec<Message>,
    draft: String,
    store: S,
    in_flight: Option<String>,
    abort: Option<AbortHandle>,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: ObserverId,
    persist_disabled: bool,
    persistence_warning: Option<String>,
}

impl<S: KeyValueStore> ConversationSession<S> {
    /// Start a session from whatever `store` holds. Never fails: an absent,
    /// malformed or unreadable snapshot yields an empty conversation.
    pub fn hydrate(store: S) -> Self {
        let mut session = Self {
            messages: Vec::new(),
            draft: String::new(),
            store,
            in_flight: None,
            abort: None,
            observers: Vec::new(),
            next_observer: 0,
            persist_disabled: false,
            persistence_warning: None,
        };

        match load_json::<Vec<Message>>(&session.store, STORAGE_KEY) {
            Ok(Some(messages)) => session.messages = messages,
            Ok(None) => {}
            Err(StorageError::Malformed(e)) => {
                warn!("chat: discarding malformed saved conversation: {e}");
            }
            Err(e) => {
                warn!("chat: saved conversation unreadable: {e}");
                session.persistence_warning = Some(format!("Saved chat history could not be loaded ({e})."));
            }
        }
        session
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Editable at any time, including while a turn streams.
    pub fn set_draft(&mut self, text: &str) {
        text.clone_into(&mut self.draft);
        self.notify();
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.in_flight.is_some()
    }

    #[must_use]
    pub fn persistence_warning(&self) -> Option<&str> {
        self.persistence_warning.as_deref()
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            messages: &self.messages,
            draft: &self.draft,
            streaming: self.is_streaming(),
            persistence_warning: self.persistence_warning(),
        }
    }

    /// Register `observer`; it runs after every mutation.
    pub fn subscribe(&mut self, observer: impl Fn(&SessionView<'_>) + 'static) -> ObserverId {
        let id = self.next_observer;
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) {
        self.observers.retain(|(oid, _)| *oid != id);
    }

    // -------------------------------------------------------------------------
    // Turn lifecycle
    // -------------------------------------------------------------------------

    /// Start a turn for `text`.
    ///
    /// Returns `None` without touching anything when `text` is blank or a
    /// turn is already streaming.
    pub fn begin_submit(&mut self, text: &str) -> Option<PendingTurn> {
        if text.trim().is_empty() || self.is_streaming() {
            return None;
        }

        self.messages.push(Message::new(Role::User, text));
        self.draft.clear();
        // Turns that failed before any text arrived carry nothing worth sending.
        let history = self
            .messages
            .iter()
            .filter(|m| m.role == Role::User || !m.content.is_empty())
            .map(Message::to_wire)
            .collect();

        let assistant = Message::new(Role::Assistant, "");
        let assistant_id = assistant.id.clone();
        self.messages.push(assistant);
        self.in_flight = Some(assistant_id.clone());
        let (handle, abort) = AbortHandle::new_pair();
        self.abort = Some(handle);

        self.persist();
        self.notify();
        Some(PendingTurn { assistant_id, history, abort })
    }

    /// Append a delta to the in-flight assistant message and save the
    /// snapshot, so a reload mid-stream keeps the text received so far.
    ///
    /// Returns `false` when `id` is no longer in flight (cancelled or
    /// cleared); the caller should stop pulling.
    pub fn apply_delta(&mut self, id: &str, text: &str) -> bool {
        if self.in_flight.as_deref() != Some(id) {
            return false;
        }
        let Some(msg) = self.messages.iter_mut().rev().find(|m| m.id == id) else {
            return false;
        };
        msg.content.push_str(text);
        self.persist();
        self.notify();
        true
    }

    /// Record how the turn for `id` ended and persist. Stale ids are ignored.
    pub fn finish_turn(&mut self, id: &str, outcome: TurnOutcome) {
        if self.in_flight.as_deref() != Some(id) {
            return;
        }
        self.in_flight = None;
        self.abort = None;

        if let Some(msg) = self.messages.iter_mut().rev().find(|m| m.id == id) {
            match outcome {
                TurnOutcome::Completed => {}
                TurnOutcome::Failed(e) => {
                    warn!("chat: turn failed: {e}");
                    msg.incomplete = true;
                    msg.error = Some(e.to_string());
                }
                TurnOutcome::Cancelled => {
                    log!("chat: turn cancelled");
                    msg.incomplete = true;
                    msg.error = Some(CANCELLED.to_owned());
                }
            }
        }

        self.persist();
        self.notify();
    }

    /// End the in-flight turn, keeping its partial content. The turn's
    /// driver is aborted, which drops the relay stream.
    pub fn cancel(&mut self) {
        self.abort_driver();
        if let Some(id) = self.in_flight.clone() {
            self.finish_turn(&id, TurnOutcome::Cancelled);
        }
    }

    /// Empty the conversation and draft and erase the snapshot. Abandons any
    /// in-flight turn. Calling it again changes nothing.
    pub fn clear(&mut self) {
        self.abort_driver();
        if self.in_flight.take().is_some() {
            log!("chat: clear abandoned the in-flight turn");
        }
        self.messages.clear();
        self.draft.clear();

        let removed = self.store.remove(STORAGE_KEY).or_else(|e| {
            warn!("chat: erasing saved conversation failed ({e}); retrying once");
            self.store.remove(STORAGE_KEY)
        });
        match removed {
            Ok(()) => {
                self.persist_disabled = false;
                self.persistence_warning = None;
            }
            Err(e) => {
                warn!("chat: saved conversation could not be erased: {e}");
                self.persistence_warning = Some(format!("Saved chat history could not be erased ({e})."));
            }
        }
        self.notify();
    }

    /// Run a whole turn against `relay`. Returns `false` if `text` was
    /// rejected by [`ConversationSession::begin_submit`].
    pub async fn submit<R: CompletionRelay + ?Sized>(&mut self, relay: &R, text: &str) -> bool {
        let Some(turn) = self.begin_submit(text) else {
            return false;
        };
        let id = turn.assistant_id.clone();
        let outcome = run_turn(relay, turn, |delta| self.apply_delta(&id, delta)).await;
        self.finish_turn(&id, outcome);
        true
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn abort_driver(&mut self) {
        if let Some(handle) = self.abort.take() {
            handle.abort();
        }
    }

    fn notify(&self) {
        let view = self.view();
        for (_, observer) in &self.observers {
            observer(&view);
        }
    }

    /// Current conversation as it should survive a reload: an assistant
    /// message still streaming is saved as incomplete.
    fn snapshot(&self) -> Vec<Message> {
        let mut snapshot = self.messages.clone();
        if let Some(id) = &self.in_flight {
            if let Some(msg) = snapshot.iter_mut().find(|m| &m.id == id) {
                msg.incomplete = true;
            }
        }
        snapshot
    }

    fn persist(&mut self) {
        if self.persist_disabled {
            return;
        }
        let snapshot = self.snapshot();
        let saved = save_json(&mut self.store, STORAGE_KEY, &snapshot).or_else(|e| {
            warn!("chat: saving conversation failed ({e}); retrying once");
            save_json(&mut self.store, STORAGE_KEY, &snapshot)
        });
        if let Err(e) = saved {
            warn!("chat: conversation will only be kept in memory: {e}");
            self.persist_disabled = true;
            self.persistence_warning = Some(format!("Chat history is not being saved ({e})."));
        }
    }
}

/// Stream one turn from `relay`, handing each delta to `on_delta` until the
/// stream ends, `on_delta` returns `false`, or the session aborts the turn.
///
/// Stopping early drops the relay stream, which releases the connection.
/// An abort takes effect immediately, even while the relay is stalled.
pub async fn run_turn<R, F>(relay: &R, turn: PendingTurn, mut on_delta: F) -> TurnOutcome
where
    R: CompletionRelay + ?Sized,
    F: FnMut(&str) -> bool,
{
    let PendingTurn { history, abort, .. } = turn;
    let drive = async {
        let mut deltas = match relay.open(&history).await {
            Ok(stream) => stream,
            Err(e) => return TurnOutcome::Failed(e),
        };
        while let Some(item) = deltas.next().await {
            match item {
                Ok(text) => {
                    if !on_delta(&text) {
                        return TurnOutcome::Cancelled;
                    }
                }
                Err(e) => return TurnOutcome::Failed(e),
            }
        }
        TurnOutcome::Completed
    };
    Abortable::new(drive, abort).await.unwrap_or(TurnOutcome::Cancelled)
}

#[cfg(test)]
#[path = "conversation_test.rs"]
mod tests;
