mod llm;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use crate::llm::LlmChat;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    // Initialize LLM client (non-fatal: /api/chat answers 503 if config missing).
    let llm: Option<Arc<dyn LlmChat>> = match llm::LlmClient::from_env() {
        Ok(client) => {
            tracing::info!(provider = client.provider().as_str(), model = client.model(), "LLM client initialized");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM client not configured; chat relay disabled");
            None
        }
    };

    let relay = services::relay::RelayConfig::from_env();
    tracing::info!(
        max_duration_secs = relay.max_duration.as_secs(),
        max_tokens = relay.max_tokens,
        "relay configured"
    );

    let app = routes::app(state::AppState::new(llm, relay));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "chat relay listening");
    axum::serve(listener, app).await.expect("server failed");
}
