//! Axum HTTP server for the sanitizing proxy.
//!
//! This module provides the `serve()` function that runs the proxy on a
//! pre-bound `TcpListener`, plus the router it serves so tests can drive it
//! without a socket.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Extension, Json, Router, ServiceExt,
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use reqwest::Client;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{catch_panic::CatchPanicLayer, normalize_path::NormalizePath, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::catalog::{ModelCatalog, UpstreamCatalog};
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::facade;
use crate::forward::{UpstreamReply, forward, relay, with_body};
use crate::gate;
use crate::normalize::normalize_response;
use crate::sanitize::Sanitizer;
use crate::stream::{sse_frames, sse_response};
use crate::trace::{TraceId, TraceRecorder};

/// Shared application state for the proxy server.
#[derive(Clone)]
pub struct ProxyState {
    /// HTTP client for forwarding requests upstream.
    pub client: Client,
    pub config: Arc<ProxyConfig>,
    pub recorder: Arc<TraceRecorder>,
    pub sanitizer: Arc<Sanitizer>,
    /// Source for `/v1/models`.
    pub catalog: Arc<dyn ModelCatalog>,
}

impl ProxyState {
    /// Build the state, discovering models from the upstream's tag list.
    pub fn new(config: ProxyConfig) -> anyhow::Result<Self> {
        let client = Client::builder().pool_max_idle_per_host(10).build()?;
        let catalog = Arc::new(UpstreamCatalog::new(
            client.clone(),
            config.upstream_endpoint("/api/tags"),
        ));

        Ok(Self {
            client,
            recorder: Arc::new(TraceRecorder::new(config.trace.clone())),
            sanitizer: Arc::new(Sanitizer::new(config.sanitizer.clone())),
            config: Arc::new(config),
            catalog,
        })
    }

    /// Replace the model catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.catalog = catalog;
        self
    }
}

/// Start the proxy server with a pre-bound listener.
///
/// Runs until the cancellation token is triggered.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built or the server fails.
pub async fn serve(
    listener: TcpListener,
    config: ProxyConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let upstream = config.upstream_url.clone();
    let state = ProxyState::new(config)?;

    info!(%addr, %upstream, "Proxy listening");
    info!("Point OpenAI clients at: http://{addr}/v1");

    axum::serve(listener, ServiceExt::<Request>::into_make_service(app(state)))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("Proxy server shut down");
    Ok(())
}

/// The router wrapped so that `/v1/models/` and `/v1/models` are the same.
pub fn app(state: ProxyState) -> NormalizePath<Router> {
    NormalizePath::trim_trailing_slash(build_router(state))
}

/// Routes and middleware, outermost first: HTTP trace span, request log,
/// security gate, panic boundary.
///
/// The request log wraps the gate so rejections carry a trace id too.
pub fn build_router(state: ProxyState) -> Router {
    let policy = Arc::new(state.config.security.clone());
    let gate_layer = middleware::from_fn(move |req: Request, next: Next| {
        let policy = Arc::clone(&policy);
        async move { gate::security_gate(policy, req, next).await }
    });

    Router::new()
        .route("/health", get(health_check).fallback(passthrough))
        .route(
            "/v1/chat/completions",
            post(chat_completions).fallback(passthrough),
        )
        .route(
            "/v1/completions",
            post(facade::completions).fallback(passthrough),
        )
        .route("/api/show", post(facade::show).fallback(passthrough))
        .route("/v1/models", get(facade::list_models).fallback(passthrough))
        .route("/v1/models/{id}", get(facade::get_model).fallback(passthrough))
        .fallback(passthrough)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(gate_layer)
        .layer(middleware::from_fn_with_state(state.clone(), request_log))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

/// Assign the trace id and log the request once it completes.
async fn request_log(State(state): State<ProxyState>, mut req: Request, next: Next) -> Response {
    let trace_id = state.recorder.next_id();
    req.extensions_mut().insert(trace_id.clone());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    if response.status().is_client_error() || response.status().is_server_error() {
        warn!(trace_id = %trace_id, %method, %path, status, elapsed_ms, "Request failed");
    } else {
        info!(trace_id = %trace_id, %method, %path, status, elapsed_ms, "Request completed");
    }
    response
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {detail}");
    ProxyError::Internal(format!("handler panicked: {detail}")).into_response()
}

// ── POST /v1/chat/completions ───────────────────────────────────────────────

async fn chat_completions(
    State(state): State<ProxyState>,
    Extension(trace_id): Extension<TraceId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let ChatOutcome {
        reply,
        client_stream,
    } = run_chat(&state, &trace_id, &headers, body).await?;

    if !reply.is_success() {
        return Ok(relay(reply));
    }

    if client_stream {
        let frames = sse_frames(&reply.body);
        if state.recorder.enabled() {
            state
                .recorder
                .record(&trace_id, "response", &frames.concat())
                .await;
        }
        return Ok(sse_response(frames));
    }

    state
        .recorder
        .record(&trace_id, "response", &reply.body)
        .await;
    Ok(with_body(reply.status, &reply.headers, reply.body))
}

/// A chat round trip, normalized when the upstream succeeded.
pub(crate) struct ChatOutcome {
    pub reply: UpstreamReply,
    /// The client asked for SSE.
    pub client_stream: bool,
}

/// Sanitize, forward and normalize one chat request.
pub(crate) async fn run_chat(
    state: &ProxyState,
    trace_id: &TraceId,
    headers: &HeaderMap,
    raw: Bytes,
) -> Result<ChatOutcome, ProxyError> {
    let recorder = &state.recorder;
    recorder.record(trace_id, "request", &raw).await;

    // Sanitizing may read skill files from disk
    let sanitizer = Arc::clone(&state.sanitizer);
    let body = raw.clone();
    let sanitized = tokio::task::spawn_blocking(move || sanitizer.sanitize(&body))
        .await
        .map_err(|e| ProxyError::Internal(format!("sanitizer task failed: {e}")))?;
    recorder.record(trace_id, "sanitized", &sanitized.body).await;
    if let Some(prompt) = &sanitized.system_prompt {
        recorder
            .record(trace_id, "system-prompt", prompt.as_bytes())
            .await;
    }

    info!(
        trace_id = %trace_id,
        model = sanitized.model.as_deref().unwrap_or("-"),
        stream = sanitized.client_stream,
        tool_intent = sanitized.tool_policy.is_some(),
        passthrough = sanitized.passthrough,
        "Processing chat completion"
    );

    let mut headers = headers.clone();
    if !sanitized.passthrough {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    let url = state.config.upstream_endpoint("/v1/chat/completions");
    let mut reply = forward(
        &state.client,
        Method::POST,
        &url,
        &headers,
        sanitized.body.clone(),
        state.config.upstream_timeout,
    )
    .await?;
    recorder.record(trace_id, "upstream", &reply.body).await;

    if reply.status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(trace_id = %trace_id, "Upstream returned 500; keeping request bodies");
        recorder.persist_failure(trace_id, "500-raw", &raw).await;
        recorder
            .persist_failure(trace_id, "500-sanitized", &sanitized.body)
            .await;
    }

    if reply.is_success() {
        reply.body = normalize_response(&reply.body, sanitized.tool_policy.as_ref());
    }

    Ok(ChatOutcome {
        reply,
        client_stream: sanitized.client_stream,
    })
}

// ── Everything else ─────────────────────────────────────────────────────────

/// Forward any other request verbatim and relay the reply.
async fn passthrough(
    State(state): State<ProxyState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = state.config.upstream_endpoint(path);
    let reply = forward(
        &state.client,
        method,
        &url,
        &headers,
        body,
        state.config.upstream_timeout,
    )
    .await?;
    Ok(relay(reply))
}
