use super::*;
use futures::executor::block_on;
use futures::stream;

fn body(chunks: &[&str]) -> stream::Iter<std::vec::IntoIter<Result<Vec<u8>, String>>> {
    let owned: Vec<Result<Vec<u8>, String>> = chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
    stream::iter(owned)
}

fn collect(stream: DeltaStream) -> Vec<Result<String, RelayError>> {
    block_on(stream.collect())
}

// =============================================================================
// decode_delta_stream
// =============================================================================

#[test]
fn clean_stream_yields_deltas_then_ends() {
    let items = collect(decode_delta_stream(body(&[
        "f:{\"messageId\":\"m1\"}\n0:\"We're\"\n",
        "0:\" open\"\n0:\" 9–5.\"\n",
        "d:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":1,\"completionTokens\":3}}\n",
    ])));
    assert_eq!(items, vec![Ok("We're".into()), Ok(" open".into()), Ok(" 9–5.".into())]);
}

#[test]
fn parts_split_across_chunks_are_reassembled() {
    let full = "f:{\"messageId\":\"m1\"}\n0:\"9–5\"\nd:{\"finishReason\":\"stop\"}\n";
    let bytes = full.as_bytes();
    let split = full.find('–').unwrap() + 1; // inside the multi-byte dash
    let owned: Vec<Result<Vec<u8>, String>> = vec![Ok(bytes[..split].to_vec()), Ok(bytes[split..].to_vec())];
    let items = collect(decode_delta_stream(stream::iter(owned)));
    assert_eq!(items, vec![Ok("9–5".into())]);
}

#[test]
fn error_part_ends_stream_with_mapped_error() {
    let items = collect(decode_delta_stream(body(&[
        "f:{\"messageId\":\"m1\"}\n0:\"We'r\"\n3:{\"code\":\"E_TIMEOUT\",\"message\":\"too slow\"}\n0:\"late\"\n",
    ])));
    assert_eq!(items, vec![Ok("We'r".into()), Err(RelayError::Timeout("too slow".into()))]);
}

#[test]
fn body_without_terminal_part_is_truncated() {
    let items = collect(decode_delta_stream(body(&["f:{\"messageId\":\"m1\"}\n0:\"We'r\"\n"])));
    assert_eq!(items, vec![Ok("We'r".into()), Err(RelayError::Truncated)]);
}

#[test]
fn unterminated_final_finish_line_still_counts() {
    let items = collect(decode_delta_stream(body(&["0:\"hi\"\nd:{\"finishReason\":\"stop\"}"])));
    assert_eq!(items, vec![Ok("hi".into())]);
}

#[test]
fn transport_error_ends_stream() {
    let owned: Vec<Result<Vec<u8>, String>> = vec![Ok(b"0:\"a\"\n".to_vec()), Err("connection reset".into())];
    let items = collect(decode_delta_stream(stream::iter(owned)));
    assert_eq!(items, vec![Ok("a".into()), Err(RelayError::Transport("connection reset".into()))]);
}

#[test]
fn garbage_line_is_protocol_error() {
    let items = collect(decode_delta_stream(body(&["hello world\n"])));
    assert!(matches!(items.as_slice(), [Err(RelayError::Protocol(_))]));
}

#[test]
fn error_body_maps_by_code() {
    let body = ErrorBody { code: ErrorKind::Unavailable, message: "LLM not configured".into() };
    assert_eq!(RelayError::from(body), RelayError::Unavailable("LLM not configured".into()));
}

#[test]
fn url_is_joined_onto_base() {
    assert_eq!(HttpRelay::new("http://localhost:3000/").url(), "http://localhost:3000/api/chat");
}

// =============================================================================
// HttpRelay against a local server
// =============================================================================

async fn spawn_relay(status: u16, body: &'static str) -> String {
    let app = axum::Router::new().route(
        "/api/chat",
        axum::routing::post(move |axum::Json(req): axum::Json<ChatRequest>| async move {
            assert!(!req.messages.is_empty());
            (axum::http::StatusCode::from_u16(status).unwrap(), body)
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn history() -> Vec<ChatMessage> {
    vec![ChatMessage { role: frames::Role::User, content: "What are your hours?".into() }]
}

#[tokio::test]
async fn http_relay_streams_deltas() {
    let base = spawn_relay(200, "f:{\"messageId\":\"m\"}\n0:\"We're\"\n0:\" open\"\nd:{\"finishReason\":\"stop\"}\n").await;
    let stream = HttpRelay::new(&base).open(&history()).await.unwrap();
    let items: Vec<_> = stream.collect().await;
    assert_eq!(items, vec![Ok("We're".into()), Ok(" open".into())]);
}

#[tokio::test]
async fn http_relay_maps_error_body() {
    let base = spawn_relay(503, "{\"code\":\"E_UNAVAILABLE\",\"message\":\"LLM not configured\"}").await;
    let Err(err) = HttpRelay::new(&base).open(&history()).await else {
        panic!("expected refusal");
    };
    assert_eq!(err, RelayError::Unavailable("LLM not configured".into()));
}

#[tokio::test]
async fn http_relay_non_json_error_is_protocol() {
    let base = spawn_relay(500, "oops").await;
    let Err(err) = HttpRelay::new(&base).open(&history()).await else {
        panic!("expected refusal");
    };
    assert!(matches!(err, RelayError::Protocol(msg) if msg.contains("500")));
}

#[tokio::test]
async fn http_relay_unreachable_is_transport() {
    let Err(err) = HttpRelay::new("http://127.0.0.1:9").open(&history()).await else {
        panic!("expected connection failure");
    };
    assert!(matches!(err, RelayError::Transport(_)));
}
