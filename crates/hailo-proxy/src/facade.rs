//! Endpoints the proxy answers (or reshapes) instead of the upstream.
//!
//! hailo-ollama crashes on `/api/show` and has no notion of OpenAI model
//! discovery or the legacy completions API, so these are served here.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
};
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::forward::{relay, with_body};
use crate::models::{
    CompletionRequest, ModelInfo, ModelsResponse, ShowDetails, ShowRequest, ShowResponse,
    TextChoice, TextCompletionResponse,
};
use crate::server::{ProxyState, run_chat};
use crate::trace::TraceId;

// ── POST /api/show ──────────────────────────────────────────────────────────

pub(crate) async fn show(State(state): State<ProxyState>, body: Bytes) -> Json<ShowResponse> {
    let request: ShowRequest = serde_json::from_slice(&body).unwrap_or_default();
    let model = request
        .effective_model()
        .unwrap_or(&state.config.default_model);
    debug!(model, "Answering /api/show locally");
    Json(show_response(model))
}

/// Static description of `model`; family and size are read from an
/// Ollama-style `family:size` tag.
pub fn show_response(model: &str) -> ShowResponse {
    let (family, size) = model.split_once(':').unwrap_or((model, ""));
    let parameter_size = if size.is_empty() {
        "unknown".to_string()
    } else {
        size.to_ascii_uppercase()
    };

    ShowResponse {
        modelfile: format!("FROM {model}"),
        parameters: "stop <|im_end|>".to_string(),
        template: "{{ .System }}{{ .Prompt }}".to_string(),
        details: ShowDetails {
            parent_model: String::new(),
            format: "gguf".to_string(),
            family: family.to_string(),
            families: vec![family.to_string()],
            parameter_size,
            quantization_level: "Q4_0".to_string(),
        },
        model_info: serde_json::Map::new(),
    }
}

// ── GET /v1/models ──────────────────────────────────────────────────────────

pub(crate) async fn list_models(State(state): State<ProxyState>) -> Json<ModelsResponse> {
    let mut names = state.catalog.list_model_names().await;
    if names.is_empty() {
        debug!("No models discovered; advertising the default model");
        names.push(state.config.default_model.clone());
    }
    Json(ModelsResponse::from_names(names, chrono::Utc::now().timestamp()))
}

// ── GET /v1/models/{id} ─────────────────────────────────────────────────────

pub(crate) async fn get_model(Path(id): Path<String>) -> Json<ModelInfo> {
    Json(ModelInfo::new(id, chrono::Utc::now().timestamp()))
}

// ── POST /v1/completions ────────────────────────────────────────────────────

/// Legacy completions are served by the chat pipeline, never streamed.
pub(crate) async fn completions(
    State(state): State<ProxyState>,
    Extension(trace_id): Extension<TraceId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let chat_body = completion_to_chat(&body).unwrap_or_else(|| {
        warn!(trace_id = %trace_id, "Legacy completion body unreadable; forwarding as chat");
        body
    });

    let outcome = run_chat(&state, &trace_id, &headers, chat_body).await?;
    let reply = outcome.reply;
    if !reply.is_success() {
        return Ok(relay(reply));
    }

    let completion = chat_to_completion(&reply.body);
    state
        .recorder
        .record(&trace_id, "response", &completion)
        .await;
    Ok(with_body(reply.status, &reply.headers, completion))
}

/// Rewrite a legacy completion request as a single-turn chat request.
///
/// Returns `None` when the body is not a completion request object.
pub fn completion_to_chat(body: &[u8]) -> Option<Bytes> {
    let request: CompletionRequest = serde_json::from_slice(body).ok()?;

    let prompt = match request.prompt {
        Some(Value::String(text)) => text,
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };

    let mut chat = json!({
        "messages": [{"role": "user", "content": prompt}],
        "stream": false,
    });
    let fields = [
        ("model", request.model.map(Value::String)),
        ("temperature", request.temperature),
        ("top_p", request.top_p),
        ("max_tokens", request.max_tokens),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            chat[key] = value;
        }
    }

    serde_json::to_vec(&chat).ok().map(Bytes::from)
}

/// Convert a (normalized) chat response into a `text_completion`.
///
/// Non-object bodies are returned unchanged.
pub fn chat_to_completion(raw: &[u8]) -> Bytes {
    let Ok(Value::Object(resp)) = serde_json::from_slice::<Value>(raw) else {
        return Bytes::copy_from_slice(raw);
    };

    let choice = resp
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first());
    let text = choice
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let finish_reason = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(Value::as_str)
        .unwrap_or("stop");
    let text_of = |key: &str, default: &str| {
        resp.get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };

    let completion = TextCompletionResponse {
        id: text_of("id", "cmpl-0"),
        object: "text_completion".to_string(),
        created: resp
            .get("created")
            .cloned()
            .unwrap_or_else(|| json!(chrono::Utc::now().timestamp())),
        model: text_of("model", "unknown"),
        choices: vec![TextChoice {
            index: 0,
            text: text.to_string(),
            logprobs: None,
            finish_reason: finish_reason.to_string(),
        }],
        usage: resp.get("usage").cloned(),
    };

    match serde_json::to_vec(&completion) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            warn!("Failed to serialize text completion: {e}");
            Bytes::copy_from_slice(raw)
        }
    }
}
