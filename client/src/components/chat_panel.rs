//! Chat panel: transcript, prompt input, send/stop and clear controls.
//!
//! SYSTEM CONTEXT
//! ==============
//! Pure view over a [`ChatSnapshot`]. Every user action is forwarded through
//! a callback; the panel never mutates conversation state itself.

use frames::Role;
use leptos::prelude::*;

use crate::state::conversation::{ChatSnapshot, Message};

/// Heading above the transcript; also the document title.
pub const PANEL_TITLE: &str = "AI FAQ Bot";

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "You: ",
        Role::Assistant => "AI: ",
    }
}

/// Note shown under an assistant message that did not finish.
fn incomplete_note(msg: &Message) -> Option<String> {
    if !msg.incomplete {
        return None;
    }
    Some(match msg.error.as_deref() {
        Some(err) => format!("(incomplete: {err})"),
        None => "(incomplete)".to_owned(),
    })
}

#[component]
pub fn ChatPanel(
    chat: ReadSignal<ChatSnapshot>,
    on_draft: Callback<String>,
    on_send: Callback<()>,
    on_stop: Callback<()>,
    on_clear: Callback<()>,
) -> impl IntoView {
    let messages_ref = NodeRef::<leptos::html::Div>::new();

    Effect::new(move || {
        chat.with(|c| {
            let _ = c.messages.last().map(|m| m.content.len());
        });

        #[cfg(feature = "csr")]
        {
            if let Some(el) = messages_ref.get() {
                let scroll_height = el.scroll_height();
                el.set_scroll_top(scroll_height);
            }
        }
    });

    let on_submit = move |ev: leptos::ev::SubmitEvent| {
        ev.prevent_default();
        on_send.run(());
    };

    let can_send = move || chat.with(|c| !c.streaming && !c.draft.trim().is_empty());
    let thinking = move || {
        chat.with(|c| c.streaming && c.messages.last().is_some_and(|m| m.role == Role::Assistant && m.content.is_empty()))
    };

    view! {
        <div class="chat-panel">
            <h1 class="chat-panel__title">{PANEL_TITLE}</h1>
            <div class="chat-panel__messages" node_ref=messages_ref>
                {move || {
                    chat.with(|c| {
                        c.messages
                            .iter()
                            .map(|msg| {
                                let label = role_label(msg.role);
                                let content = msg.content.clone();
                                let note = incomplete_note(msg);
                                let is_assistant = msg.role == Role::Assistant;
                                let is_incomplete = note.is_some();
                                view! {
                                    <div
                                        class="chat-panel__message"
                                        class:chat-panel__message--assistant=is_assistant
                                        class:chat-panel__message--incomplete=is_incomplete
                                    >
                                        <strong class="chat-panel__role">{label}</strong>
                                        <span class="chat-panel__content">{content}</span>
                                        {note.map(|n| view! { <div class="chat-panel__note">{n}</div> })}
                                    </div>
                                }
                            })
                            .collect::<Vec<_>>()
                    })
                }}
                <Show when=thinking>
                    <div class="chat-panel__thinking">"Thinking..."</div>
                </Show>
            </div>

            {move || {
                chat.with(|c| c.persistence_warning.clone())
                    .map(|w| view! { <div class="chat-panel__warning">{w}</div> })
            }}

            <form class="chat-panel__input-row" on:submit=on_submit>
                <input
                    class="chat-panel__input"
                    type="text"
                    name="prompt"
                    placeholder="Ask a question..."
                    prop:value=move || chat.with(|c| c.draft.clone())
                    on:input=move |ev| on_draft.run(event_target_value(&ev))
                />
                {move || {
                    if chat.with(|c| c.streaming) {
                        view! {
                            <button type="button" class="btn chat-panel__stop" on:click=move |_| on_stop.run(())>
                                "Stop"
                            </button>
                        }
                            .into_any()
                    } else {
                        view! {
                            <button type="submit" class="btn btn--primary chat-panel__send" disabled=move || !can_send()>
                                "Send"
                            </button>
                        }
                            .into_any()
                    }
                }}
            </form>

            <button class="btn chat-panel__clear" on:click=move |_| on_clear.run(())>
                "Clear Chat"
            </button>
        </div>
    }
}

#[cfg(test)]
#[path = "chat_panel_test.rs"]
mod tests;
