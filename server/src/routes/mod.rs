//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router serves the chat relay API and, as a fallback, the static
//! client bundle. The browser only ever talks to this origin; the provider
//! credential stays on the server.

pub mod chat;

use std::path::PathBuf;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// API routes without the static fallback.
pub fn api_routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(state)
}

/// Resolve the path to the built client bundle.
fn client_dist_dir() -> PathBuf {
    std::env::var("CLIENT_DIST_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../client/dist"))
}

/// Full application: API routes, static client bundle at `/`, request tracing.
pub fn app(state: AppState) -> Router {
    let client_service = ServeDir::new(client_dist_dir()).append_index_html_on_directories(true);

    api_routes(state)
        .fallback_service(client_service)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
