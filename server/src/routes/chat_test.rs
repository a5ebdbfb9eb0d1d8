use super::*;
use std::sync::Arc;
use std::time::Duration;

use frames::{ErrorBody, LineDecoder, StreamPart};
use tokio::time::timeout;

use crate::llm::LlmChat;
use crate::llm::types::LlmError;
use crate::services::relay::RelayConfig;
use crate::state::test_helpers::{MockLlm, delta, finished};

async fn spawn_app(llm: Option<Arc<MockLlm>>, relay: RelayConfig) -> String {
    let llm = llm.map(|m| m as Arc<dyn LlmChat>);
    let app = crate::routes::api_routes(AppState::new(llm, relay));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn post_chat(base: &str, body: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{base}/api/chat"))
        .header("content-type", "application/json")
        .body(body.to_owned())
        .send()
        .await
        .unwrap()
}

fn decode_all(text: &str) -> Vec<StreamPart> {
    let mut decoder = LineDecoder::new();
    let mut parts: Vec<StreamPart> = decoder.push(text.as_bytes()).into_iter().map(Result::unwrap).collect();
    if let Some(tail) = decoder.finish() {
        parts.push(tail.unwrap());
    }
    parts
}

const HOURS: &str = r#"{"messages":[{"role":"user","content":"What are your hours?"}]}"#;

#[tokio::test]
async fn healthz_is_ok() {
    let base = spawn_app(None, RelayConfig::default()).await;
    let resp = reqwest::get(format!("{base}/healthz")).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn chat_streams_framed_deltas() {
    let llm = Arc::new(MockLlm::new(vec![delta("We're"), delta(" open"), delta(" 9–5."), finished()]));
    let base = spawn_app(Some(llm), RelayConfig::default()).await;

    let resp = post_chat(&base, HOURS).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()[STREAM_HEADER], STREAM_VERSION);
    assert_eq!(resp.headers()[CONTENT_TYPE], STREAM_CONTENT_TYPE);
    assert_eq!(resp.headers()[CACHE_CONTROL], "no-cache");

    let parts = decode_all(&resp.text().await.unwrap());
    assert!(matches!(parts.first(), Some(StreamPart::Start { .. })));
    let text: String = parts
        .iter()
        .filter_map(|p| match p {
            StreamPart::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "We're open 9–5.");
    assert!(matches!(parts.last(), Some(StreamPart::Finish { .. })));
}

#[tokio::test]
async fn malformed_body_is_400_without_provider_call() {
    let llm = Arc::new(MockLlm::new(vec![finished()]));
    let base = spawn_app(Some(llm.clone()), RelayConfig::default()).await;

    let resp = post_chat(&base, r#"{"messages":[{"role":"user"}]}"#).await;
    assert_eq!(resp.status(), 400);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.code, ErrorKind::MalformedRequest);
    assert!(!llm.was_called());
}

#[tokio::test]
async fn missing_provider_is_503() {
    let base = spawn_app(None, RelayConfig::default()).await;
    let resp = post_chat(&base, HOURS).await;
    assert_eq!(resp.status(), 503);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.code, ErrorKind::Unavailable);
}

#[tokio::test]
async fn provider_rejection_is_502() {
    let llm = Arc::new(MockLlm::rejecting(LlmError::ApiResponse { status: 429, body: "slow down".into() }));
    let base = spawn_app(Some(llm), RelayConfig::default()).await;

    let resp = post_chat(&base, HOURS).await;
    assert_eq!(resp.status(), 502);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.code, ErrorKind::Upstream);
    assert!(!body.message.contains("slow down"));
}

#[tokio::test]
async fn provider_handshake_timeout_is_504() {
    let mut mock = MockLlm::new(vec![finished()]);
    mock.open_delay = Some(Duration::from_millis(500));
    let relay = RelayConfig { max_duration: Duration::from_millis(50), ..RelayConfig::default() };
    let base = spawn_app(Some(Arc::new(mock)), relay).await;

    let resp = post_chat(&base, HOURS).await;
    assert_eq!(resp.status(), 504);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.code, ErrorKind::Timeout);
}

#[tokio::test]
async fn mid_stream_failure_keeps_partial_text_and_ends_with_error_part() {
    let llm = Arc::new(MockLlm::new(vec![delta("We'r"), Err(LlmError::StreamTruncated)]));
    let base = spawn_app(Some(llm), RelayConfig::default()).await;

    let resp = post_chat(&base, HOURS).await;
    assert_eq!(resp.status(), 200);
    let parts = decode_all(&resp.text().await.unwrap());
    assert_eq!(parts[1], StreamPart::Text("We'r".into()));
    assert!(matches!(parts.last(), Some(StreamPart::Error(body)) if body.code == ErrorKind::Upstream));
}

#[tokio::test]
async fn first_delta_arrives_before_stream_completes() {
    let mut mock = MockLlm::new(vec![delta("We're")]);
    mock.hang_after_script = true;
    let llm = Arc::new(mock);
    let base = spawn_app(Some(llm.clone()), RelayConfig::default()).await;

    let mut resp = post_chat(&base, HOURS).await;
    let mut seen = String::new();
    while !seen.contains("0:") {
        let chunk = timeout(Duration::from_secs(2), resp.chunk())
            .await
            .expect("first delta should be flushed while the provider is still streaming")
            .unwrap()
            .unwrap();
        seen.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    assert!(seen.contains("0:\"We're\""));

    // Client goes away; the relay must let go of the provider stream.
    drop(resp);
    let released = timeout(Duration::from_secs(2), async {
        while !llm.stream_dropped() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "provider stream still held after disconnect");
}
