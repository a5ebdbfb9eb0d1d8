//! Client-side application state.

pub mod conversation;
