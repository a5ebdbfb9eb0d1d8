//! Network clients.

pub mod relay;
