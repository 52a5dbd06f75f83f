//! Synthetic SSE streaming for clients that asked for `stream: true`.
//!
//! The upstream only answers non-streaming. Once the full response is
//! normalized it is replayed as the frame sequence an incremental API would
//! have produced: role announcement, a single content (or tool-call) delta,
//! the finish frame with usage, and the `[DONE]` sentinel.

use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::warn;

use crate::models::{ChatChunkChoice, ChatCompletionChunk};
use crate::normalize::SYSTEM_FINGERPRINT;

/// The SSE termination frame.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Split a complete (normalized) response into SSE frames.
pub fn sse_frames(raw: &[u8]) -> Vec<Bytes> {
    let Ok(Value::Object(resp)) = serde_json::from_slice::<Value>(raw) else {
        warn!("Cannot transcode non-JSON response; wrapping it verbatim");
        let mut frame = Vec::with_capacity(raw.len() + 8);
        frame.extend_from_slice(b"data: ");
        frame.extend_from_slice(raw);
        frame.extend_from_slice(b"\n\n");
        return vec![Bytes::from(frame), Bytes::from_static(DONE_FRAME)];
    };

    let template = ChunkTemplate::from_response(&resp);
    let message = resp
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"));
    let content = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let tool_calls = message
        .and_then(|m| m.get("tool_calls"))
        .filter(|calls| calls.as_array().is_some_and(|a| !a.is_empty()));

    let mut frames = vec![template.frame(
        json!({"role": "assistant", "content": "", "refusal": null}),
        None,
        None,
    )];
    if let Some(calls) = tool_calls {
        frames.push(template.frame(json!({"tool_calls": calls}), None, None));
    } else if !content.is_empty() {
        frames.push(template.frame(json!({"content": content}), None, None));
    }
    let usage = resp.get("usage").cloned().unwrap_or_else(|| json!({}));
    frames.push(template.frame(json!({}), Some("stop"), Some(usage)));
    frames.push(Bytes::from_static(DONE_FRAME));
    frames
}

/// HTTP response streaming `frames` one at a time.
pub fn sse_response(frames: Vec<Bytes>) -> Response {
    let stream = futures_util::stream::iter(frames.into_iter().map(Ok::<_, std::io::Error>));

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("x-accel-buffering", "no") // Disable nginx buffering
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Fields repeated on every chunk.
struct ChunkTemplate {
    id: String,
    created: Value,
    model: String,
    system_fingerprint: String,
}

impl ChunkTemplate {
    fn from_response(resp: &serde_json::Map<String, Value>) -> Self {
        let text = |key: &str, default: &str| {
            resp.get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        Self {
            id: text("id", "chatcmpl-0"),
            created: resp
                .get("created")
                .cloned()
                .unwrap_or_else(|| json!(chrono::Utc::now().timestamp())),
            model: text("model", "unknown"),
            system_fingerprint: text("system_fingerprint", SYSTEM_FINGERPRINT),
        }
    }

    fn frame(&self, delta: Value, finish_reason: Option<&str>, usage: Option<Value>) -> Bytes {
        let chunk = ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            created: self.created.clone(),
            model: self.model.clone(),
            system_fingerprint: self.system_fingerprint.clone(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta,
                logprobs: None,
                finish_reason: finish_reason.map(str::to_string),
            }],
            usage,
        };
        // Serializing plain JSON values cannot fail.
        let json = serde_json::to_string(&chunk).unwrap_or_default();
        Bytes::from(format!("data: {json}\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(frame: &Bytes) -> Value {
        let text = std::str::from_utf8(frame).unwrap();
        let json = text
            .strip_prefix("data: ")
            .and_then(|t| t.strip_suffix("\n\n"))
            .unwrap();
        serde_json::from_str(json).unwrap()
    }

    fn response(message: &Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "chatcmpl-7",
            "object": "chat.completion",
            "created": 1_731_000_000,
            "model": "qwen2:1.5b",
            "system_fingerprint": "hailo-ollama",
            "choices": [{"index": 0, "message": message, "finish_reason": "stop", "logprobs": null}],
            "usage": {"prompt_tokens": 100, "completion_tokens": 1, "total_tokens": 101}
        }))
        .unwrap()
    }

    #[test]
    fn test_content_response_has_four_frames() {
        let frames = sse_frames(&response(
            &json!({"role": "assistant", "content": "hello", "refusal": null}),
        ));
        assert_eq!(frames.len(), 4);

        let role = payload(&frames[0]);
        assert_eq!(role["object"], "chat.completion.chunk");
        assert_eq!(role["id"], "chatcmpl-7");
        assert_eq!(
            role["choices"][0]["delta"],
            json!({"role": "assistant", "content": "", "refusal": null})
        );
        assert!(role["choices"][0]["finish_reason"].is_null());

        assert_eq!(payload(&frames[1])["choices"][0]["delta"]["content"], "hello");

        let finish = payload(&frames[2]);
        assert_eq!(finish["choices"][0]["finish_reason"], "stop");
        assert_eq!(finish["choices"][0]["delta"], json!({}));
        assert_eq!(finish["usage"]["total_tokens"], 101);

        assert_eq!(&frames[3][..], DONE_FRAME);
    }

    #[test]
    fn test_tool_call_replaces_content_frame() {
        let calls = json!([{"id": "call_1", "type": "function",
            "function": {"name": "exec", "arguments": "{}"}}]);
        let frames = sse_frames(&response(
            &json!({"role": "assistant", "content": "", "refusal": null, "tool_calls": calls}),
        ));
        assert_eq!(frames.len(), 4);
        assert_eq!(payload(&frames[1])["choices"][0]["delta"]["tool_calls"], calls);
        assert!(payload(&frames[1])["choices"][0]["delta"].get("content").is_none());
    }

    #[test]
    fn test_empty_content_skips_content_frame() {
        let frames = sse_frames(&response(&json!({"role": "assistant", "content": ""})));
        assert_eq!(frames.len(), 3);
        assert_eq!(payload(&frames[1])["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn test_non_json_is_wrapped() {
        let frames = sse_frames(b"upstream exploded");
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], b"data: upstream exploded\n\n");
        assert_eq!(&frames[1][..], DONE_FRAME);
    }

    #[test]
    fn test_sse_response_headers() {
        let response = sse_response(sse_frames(b"x"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(response.headers()["cache-control"], "no-cache");
    }
}
