use super::*;
use futures::StreamExt;

fn named(event: &str, json: &serde_json::Value) -> SseEvent {
    SseEvent { event: Some(event.into()), data: json.to_string() }
}

#[test]
fn text_delta_yields_text() {
    let mut parser = MessagesParser::default();
    let event = named(
        "content_block_delta",
        &serde_json::json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "Hello" } }),
    );
    assert_eq!(parser.on_event(&event).unwrap(), Some(StreamEvent::Delta("Hello".into())));
}

#[test]
fn full_message_reports_usage_and_stop_reason() {
    let mut parser = MessagesParser::default();
    let start = named(
        "message_start",
        &serde_json::json!({ "type": "message_start", "message": { "usage": { "input_tokens": 25, "output_tokens": 1 } } }),
    );
    let delta = named(
        "message_delta",
        &serde_json::json!({ "type": "message_delta", "delta": { "stop_reason": "max_tokens" }, "usage": { "output_tokens": 15 } }),
    );
    let stop = named("message_stop", &serde_json::json!({ "type": "message_stop" }));

    assert_eq!(parser.on_event(&start).unwrap(), None);
    assert_eq!(parser.on_event(&delta).unwrap(), None);
    assert_eq!(
        parser.on_event(&stop).unwrap(),
        Some(StreamEvent::Finished(FinishInfo { stop_reason: "max_tokens".into(), input_tokens: 25, output_tokens: 15 }))
    );
}

#[test]
fn ping_and_block_bookkeeping_are_ignored() {
    let mut parser = MessagesParser::default();
    let ping = named("ping", &serde_json::json!({ "type": "ping" }));
    let block = named(
        "content_block_start",
        &serde_json::json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "text", "text": "" } }),
    );
    assert_eq!(parser.on_event(&ping).unwrap(), None);
    assert_eq!(parser.on_event(&block).unwrap(), None);
}

#[test]
fn error_event_is_stream_error() {
    let mut parser = MessagesParser::default();
    let event = named(
        "error",
        &serde_json::json!({ "type": "error", "error": { "type": "overloaded_error", "message": "Overloaded" } }),
    );
    assert!(matches!(parser.on_event(&event), Err(LlmError::ApiStream(m)) if m == "Overloaded"));
}

#[test]
fn event_type_falls_back_to_payload() {
    let mut parser = MessagesParser::default();
    let event = SseEvent {
        event: None,
        data: serde_json::json!({ "type": "content_block_delta", "delta": { "text": "x" } }).to_string(),
    };
    assert_eq!(parser.on_event(&event).unwrap(), Some(StreamEvent::Delta("x".into())));
}

#[test]
fn request_omits_empty_system() {
    let messages = vec![Message { role: "user".into(), content: "hi".into() }];
    let sendable = sendable_messages(&messages);
    let body = ApiRequest { model: "m", max_tokens: 10, system: "", messages: &sendable, stream: true };
    let json = serde_json::to_value(&body).unwrap();
    assert!(json.get("system").is_none());
    assert_eq!(json["stream"], true);
}

#[test]
fn blank_turns_are_left_out_of_request() {
    let messages = vec![
        Message { role: "user".into(), content: "hello".into() },
        Message { role: "assistant".into(), content: String::new() },
        Message { role: "user".into(), content: "anyone there?".into() },
        Message { role: "assistant".into(), content: "We'r".into() },
        Message { role: "user".into(), content: "go on".into() },
    ];
    let sendable = sendable_messages(&messages);
    let body = ApiRequest { model: "m", max_tokens: 10, system: "sys", messages: &sendable, stream: true };
    let json = serde_json::to_value(&body).unwrap();

    let sent: Vec<(&str, &str)> = json["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| (m["role"].as_str().unwrap(), m["content"].as_str().unwrap()))
        .collect();
    assert_eq!(
        sent,
        vec![("user", "hello"), ("user", "anyone there?"), ("assistant", "We'r"), ("user", "go on")]
    );
}

#[tokio::test]
async fn stream_end_to_end_against_local_provider() {
    let body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":3}}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":1}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );
    let app = axum::Router::new().route(
        "/messages",
        axum::routing::post(move |headers: axum::http::HeaderMap| async move {
            assert_eq!(headers.get("x-api-key").unwrap(), "secret");
            assert_eq!(headers.get("anthropic-version").unwrap(), API_VERSION);
            ([("content-type", "text/event-stream")], body)
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = AnthropicClient::new("secret".into(), format!("http://{addr}"), 5).unwrap();
    let messages = vec![Message { role: "user".into(), content: "hello".into() }];
    let items: Vec<_> = client.chat_stream("claude", 32, "sys", &messages).await.unwrap().collect().await;

    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], Ok(StreamEvent::Delta(t)) if t == "Hi"));
    assert!(matches!(&items[1], Ok(StreamEvent::Finished(info)) if info.input_tokens == 3 && info.output_tokens == 1));
}
