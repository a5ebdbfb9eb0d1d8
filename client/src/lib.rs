//! # client
//!
//! Leptos + WASM chat front-end. Sends the conversation to the relay's
//! `/api/chat` endpoint, renders the streamed reply as it arrives, and keeps
//! the transcript in `localStorage` across reloads.
//!
//! The session and relay client are plain Rust and test natively; only the
//! `csr` feature pulls in the browser bindings.

pub mod app;
pub mod components;
pub mod net;
pub mod state;
pub mod util;

/// WASM entry point.
#[cfg(feature = "csr")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    let _ = console_log::init_with_level(log::Level::Info);
    leptos::mount::mount_to_body(app::App);
}
