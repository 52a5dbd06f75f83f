//! Stub hailo-ollama bound to an ephemeral port.
//!
//! Chat replies depend on the last user message:
//! - contains `explode`: HTTP 500
//! - contains `stall`: answers after five seconds
//! - contains `run script`: a JSON tool call as plain text
//! - anything else: `hello`
//!
//! Replies mimic the real server: nanosecond `created`, no usage, no
//! fingerprint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Bodies and headers the stub received, in arrival order.
#[derive(Clone, Default)]
pub struct Received {
    pub chat_bodies: Arc<Mutex<Vec<Value>>>,
    pub requests: Arc<Mutex<Vec<(String, HeaderMap)>>>,
}

impl Received {
    pub fn chat_bodies(&self) -> Vec<Value> {
        self.chat_bodies.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    // Allow unused: only the passthrough tests look at headers
    #[allow(dead_code)]
    pub fn last_headers(&self) -> Option<HeaderMap> {
        self.requests.lock().unwrap().last().map(|(_, h)| h.clone())
    }
}

/// Start the stub; returns its base URL and the request log.
pub async fn spawn() -> (String, Received) {
    let received = Received::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(chat))
        .route("/api/tags", get(tags))
        .route("/api/version", get(version))
        .layer(axum::middleware::from_fn_with_state(received.clone(), log))
        .with_state(received.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), received)
}

async fn log(
    State(received): State<Received>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    received
        .requests
        .lock()
        .unwrap()
        .push((req.uri().to_string(), req.headers().clone()));
    next.run(req).await
}

async fn chat(State(received): State<Received>, Json(body): Json<Value>) -> Response {
    received.chat_bodies.lock().unwrap().push(body.clone());

    let last_user = body["messages"]
        .as_array()
        .and_then(|messages| {
            messages
                .iter()
                .rev()
                .find(|m| m["role"] == "user")
                .and_then(|m| m["content"].as_str())
        })
        .unwrap_or_default()
        .to_string();

    if last_user.contains("explode") {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("x-upstream", "stub")],
            r#"{"error":"DTO crash"}"#,
        )
            .into_response();
    }

    if last_user.contains("stall") {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    let content = if last_user.contains("run script") {
        r#"{"tool": "exec", "arguments": {"command": "script.py"}}"#
    } else {
        "hello"
    };

    Json(json!({
        "id": "chatcmpl-stub",
        "model": body["model"].as_str().unwrap_or("qwen2:1.5b"),
        "created": 1_731_000_000_000_000_000_u64,
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    }))
    .into_response()
}

async fn tags() -> Json<Value> {
    Json(json!({"models": [{"name": "qwen2:1.5b"}, {"model": "llama3.2:1b"}]}))
}

async fn version() -> Json<Value> {
    Json(json!({"version": "0.0.1-stub"}))
}
