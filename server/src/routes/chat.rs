//! Chat relay route.
//!
//! `POST /api/chat` takes the full conversation and answers with a streamed
//! `frames` body. Failures detected before the provider accepts the request
//! are plain JSON error responses; see [`crate::services::relay`].

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use frames::{ErrorKind, STREAM_CONTENT_TYPE, STREAM_HEADER, STREAM_VERSION};
use futures::StreamExt;
use tracing::warn;
use uuid::Uuid;

use crate::services::relay::{self, FrameStream, RelayError};
use crate::state::AppState;

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::MalformedRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(self.body())).into_response()
    }
}

/// `POST /api/chat`: relay a conversation to the model as a delta stream.
pub async fn chat(State(state): State<AppState>, body: Bytes) -> Response {
    let request_id = Uuid::new_v4();
    match open(&state, &body, request_id).await {
        Ok(frames) => stream_response(frames),
        Err(e) => {
            warn!(%request_id, code = e.kind().code(), error = %e, "chat: request rejected");
            e.into_response()
        }
    }
}

async fn open(state: &AppState, body: &[u8], request_id: Uuid) -> Result<FrameStream, RelayError> {
    let messages = relay::parse_request(body)?;
    let llm = state.llm.as_ref().ok_or(RelayError::Unavailable)?;
    relay::start_relay(llm.as_ref(), state.relay, &messages, request_id).await
}

fn stream_response(frames: FrameStream) -> Response {
    let headers = [
        (CONTENT_TYPE, STREAM_CONTENT_TYPE),
        (CACHE_CONTROL, "no-cache"),
        (HeaderName::from_static(STREAM_HEADER), STREAM_VERSION),
    ];
    (headers, Body::from_stream(frames.map(Ok::<_, Infallible>))).into_response()
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
