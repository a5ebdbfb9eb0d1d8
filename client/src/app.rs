//! Root application component.
//!
//! Owns the [`ConversationSession`] and bridges it into Leptos: the session
//! lives in a local `StoredValue`, and a session observer mirrors every
//! change into an `RwSignal<ChatSnapshot>` that the panel renders from.
//! Session borrows are short and never held across an await.

use std::cell::RefCell;
use std::rc::Rc;

use leptos::prelude::*;
use leptos::task::spawn_local;
use leptos_meta::{Title, provide_meta_context};

use crate::components::chat_panel::{ChatPanel, PANEL_TITLE};
use crate::net::relay::HttpRelay;
use crate::state::conversation::{ChatSnapshot, ConversationSession, run_turn};

#[cfg(feature = "csr")]
type AppStore = crate::util::storage::BrowserStorage;
#[cfg(not(feature = "csr"))]
type AppStore = crate::util::storage::MemoryStore;

type SharedSession = Rc<RefCell<ConversationSession<AppStore>>>;

/// Origin the relay is served from.
fn relay_base_url() -> String {
    #[cfg(feature = "csr")]
    {
        if let Some(origin) = web_sys::window().and_then(|w| w.location().origin().ok()) {
            return origin;
        }
    }
    "http://localhost:3000".to_owned()
}

#[component]
pub fn App() -> impl IntoView {
    provide_meta_context();

    let session: SharedSession = Rc::new(RefCell::new(ConversationSession::hydrate(AppStore::default())));
    let snapshot = RwSignal::new(ChatSnapshot::from(&session.borrow().view()));
    session
        .borrow_mut()
        .subscribe(move |view| snapshot.set(ChatSnapshot::from(view)));

    let session = StoredValue::new_local(session);
    let relay = StoredValue::new_local(Rc::new(HttpRelay::new(&relay_base_url())));

    let on_draft = Callback::new(move |text: String| {
        session.get_value().borrow_mut().set_draft(&text);
    });

    let on_send = Callback::new(move |()| {
        let session = session.get_value();
        let draft = session.borrow().draft().to_owned();
        let Some(turn) = session.borrow_mut().begin_submit(&draft) else {
            return;
        };
        let relay = relay.get_value();
        spawn_local(async move {
            let id = turn.assistant_id.clone();
            let outcome = run_turn(relay.as_ref(), turn, |delta| session.borrow_mut().apply_delta(&id, delta)).await;
            session.borrow_mut().finish_turn(&id, outcome);
        });
    });

    let on_stop = Callback::new(move |()| session.get_value().borrow_mut().cancel());
    let on_clear = Callback::new(move |()| session.get_value().borrow_mut().clear());

    view! {
        <Title text=PANEL_TITLE/>
        <main class="app">
            <ChatPanel
                chat=snapshot.read_only()
                on_draft=on_draft
                on_send=on_send
                on_stop=on_stop
                on_clear=on_clear
            />
        </main>
    }
}
