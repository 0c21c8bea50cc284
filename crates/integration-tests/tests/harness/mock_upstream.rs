//! Mock provider backend for integration tests
//!
//! Serves the `OpenAI` Responses, Anthropic Messages and Gemini
//! `generateContent` endpoints with canned bodies and records every request.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// One request the mock received
#[derive(Debug, Clone)]
pub struct Recorded {
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Canned answer for every route
#[derive(Debug, Clone)]
pub enum Reply {
    /// Provider-shaped success, JSON or SSE depending on the request
    Canned,
    /// Fixed status and body
    Error { status: StatusCode, body: String },
    /// Raw SSE body
    Sse(String),
}

struct MockState {
    reply: Reply,
    requests: Mutex<Vec<Recorded>>,
}

/// Mock upstream bound to a random local port
pub struct MockUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

impl MockUpstream {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(Reply::Canned).await
    }

    pub async fn start_with(reply: Reply) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            reply,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v1/responses", routing::post(handle_openai))
            .route("/v1/messages", routing::post(handle_anthropic))
            .route("/v1beta/models/{action}", routing::post(handle_gemini))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for `OpenAI` and Anthropic provider records
    pub fn base_url(&self) -> url::Url {
        url::Url::parse(&format!("http://{}/v1", self.addr)).unwrap()
    }

    /// Base URL for Gemini provider records
    pub fn gemini_base_url(&self) -> url::Url {
        url::Url::parse(&format!("http://{}/v1beta", self.addr)).unwrap()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn record(state: &MockState, uri: Uri, headers: HeaderMap, body: &Value) {
    state.requests.lock().unwrap().push(Recorded {
        uri,
        headers,
        body: body.clone(),
    });
}

/// Reply with a non-canned answer if one is configured
fn override_reply(state: &MockState) -> Option<Response> {
    match &state.reply {
        Reply::Canned => None,
        Reply::Error { status, body } => Some((*status, body.clone()).into_response()),
        Reply::Sse(body) => Some(sse(body.clone())),
    }
}

fn sse(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

/// Serialize `(event, data)` pairs as an SSE body
pub fn sse_body(events: &[(&str, Value)]) -> String {
    events
        .iter()
        .map(|(event, data)| format!("event: {event}\ndata: {data}\n\n"))
        .collect()
}

/// Serialize data-only SSE events
pub fn sse_data(events: &[Value]) -> String {
    events.iter().map(|data| format!("data: {data}\n\n")).collect()
}

async fn handle_openai(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, uri, headers, &body);
    if let Some(reply) = override_reply(&state) {
        return reply;
    }

    let model = body["model"].as_str().unwrap_or_default().to_owned();
    let response = json!({
        "id": "resp_upstream",
        "object": "response",
        "created_at": 1_700_000_000,
        "model": model,
        "status": "completed",
        "output": [{
            "type": "message",
            "id": "msg_upstream",
            "role": "assistant",
            "status": "completed",
            "content": [{"type": "output_text", "text": "Hello from mock", "annotations": []}]
        }],
        "usage": {"input_tokens": 5, "output_tokens": 3, "total_tokens": 8}
    });

    if body["stream"].as_bool() != Some(true) {
        return Json(response).into_response();
    }

    sse(sse_body(&[
        ("response.created", json!({"type": "response.created", "response": {"id": "resp_upstream", "model": model, "output": []}})),
        ("response.output_item.added", json!({"type": "response.output_item.added", "item": {"type": "message", "id": "msg_upstream"}})),
        ("response.output_text.delta", json!({"type": "response.output_text.delta", "delta": "Hello "})),
        ("response.output_text.delta", json!({"type": "response.output_text.delta", "delta": "from mock"})),
        ("response.output_item.done", json!({"type": "response.output_item.done", "item": {"type": "message", "id": "msg_upstream"}})),
        ("response.completed", json!({"type": "response.completed", "response": response})),
    ]))
}

async fn handle_anthropic(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, uri, headers, &body);
    if let Some(reply) = override_reply(&state) {
        return reply;
    }

    let model = body["model"].as_str().unwrap_or_default().to_owned();

    if body["stream"].as_bool() != Some(true) {
        return Json(json!({
            "id": "msg_upstream",
            "type": "message",
            "role": "assistant",
            "model": model,
            "content": [{"type": "text", "text": "Hello from mock"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 3}
        }))
        .into_response();
    }

    sse(sse_body(&[
        ("message_start", json!({"type": "message_start", "message": {"model": model, "usage": {"input_tokens": 5, "output_tokens": 1}}})),
        ("content_block_start", json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}})),
        ("ping", json!({"type": "ping"})),
        ("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hello "}})),
        ("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "from mock"}})),
        ("content_block_stop", json!({"type": "content_block_stop", "index": 0})),
        ("message_delta", json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 3}})),
        ("message_stop", json!({"type": "message_stop"})),
    ]))
}

async fn handle_gemini(
    State(state): State<Arc<MockState>>,
    Path(action): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, uri, headers, &body);
    if let Some(reply) = override_reply(&state) {
        return reply;
    }

    let Some((model, method)) = action.split_once(':') else {
        return (StatusCode::NOT_FOUND, "unknown action").into_response();
    };

    let usage = json!({"promptTokenCount": 5, "candidatesTokenCount": 3, "totalTokenCount": 8});

    if method == "generateContent" {
        return Json(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hello from mock"}]}, "finishReason": "STOP"}],
            "usageMetadata": usage,
            "modelVersion": model
        }))
        .into_response();
    }

    sse(sse_data(&[
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hello "}]}}], "modelVersion": model}),
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "from mock"}]}, "finishReason": "STOP"}],
               "usageMetadata": usage, "modelVersion": model}),
    ]))
}
