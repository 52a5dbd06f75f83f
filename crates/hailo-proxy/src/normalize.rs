//! Response normalizer for chat completions.
//!
//! The upstream omits fields the OpenAI SDKs require and reports `created`
//! in nanoseconds. Every repair here is independent and only fills in or
//! fixes what is wrong, so normalizing twice is a no-op.

use bytes::Bytes;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::models::Usage;
use crate::sanitize::flatten_content;
use crate::tools::{ToolPolicy, resolve_tool_call};

/// `created` values above this are nanoseconds, not seconds.
pub const NANOSECOND_THRESHOLD: u64 = 1_000_000_000_000_000;

/// Reported when the upstream sends no fingerprint.
pub const SYSTEM_FINGERPRINT: &str = "hailo-ollama";

/// Stand-in prompt token count for estimated usage.
pub const PLACEHOLDER_PROMPT_TOKENS: u64 = 100;

/// Normalize raw upstream bytes; non-object payloads are returned unchanged.
pub fn normalize_response(raw: &[u8], policy: Option<&ToolPolicy>) -> Bytes {
    let mut resp = match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(resp)) => resp,
        _ => {
            warn!("Upstream response is not a JSON object; returning it unchanged");
            return Bytes::copy_from_slice(raw);
        }
    };

    normalize_object(&mut resp, policy, chrono::Utc::now().timestamp());

    match serde_json::to_vec(&Value::Object(resp)) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            warn!("Failed to serialize normalized response: {e}");
            Bytes::copy_from_slice(raw)
        }
    }
}

/// Apply every repair in place. `now` is the current unix time in seconds.
pub fn normalize_object(resp: &mut Map<String, Value>, policy: Option<&ToolPolicy>, now: i64) {
    let created = normalize_created(resp.get("created"), now);
    resp.insert("created".to_string(), created);

    set_default(resp, "object", || json!("chat.completion"));
    set_default(resp, "system_fingerprint", || json!(SYSTEM_FINGERPRINT));
    set_default(resp, "id", || {
        json!(format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()))
    });
    set_default(resp, "model", || json!("unknown"));

    let mut total_chars = 0;
    if let Some(Value::Array(choices)) = resp.get_mut("choices") {
        for (index, choice) in choices.iter_mut().enumerate() {
            if let Value::Object(choice) = choice {
                total_chars += normalize_choice(choice, index, policy);
            }
        }
    }

    if resp.get("usage").is_none_or(Value::is_null) {
        resp.insert("usage".to_string(), json!(estimate_usage(total_chars)));
    }
}

/// Seconds stay, nanoseconds are divided down, missing or zero becomes `now`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn normalize_created(created: Option<&Value>, now: i64) -> Value {
    let seconds = created.and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_f64().filter(|f| f.is_finite() && *f > 0.0).map(|f| f as u64))
    });
    match seconds {
        Some(ns) if ns > NANOSECOND_THRESHOLD => json!(ns / 1_000_000_000),
        Some(0) | None => json!(now),
        Some(_) => created.cloned().unwrap_or_else(|| json!(now)),
    }
}

/// Repair one choice; returns the character count of its original content.
fn normalize_choice(
    choice: &mut Map<String, Value>,
    index: usize,
    policy: Option<&ToolPolicy>,
) -> usize {
    set_default(choice, "index", || json!(index));
    set_default(choice, "finish_reason", || json!("stop"));
    if !choice.contains_key("logprobs") {
        choice.insert("logprobs".to_string(), Value::Null);
    }

    let mut message = match choice.remove("message") {
        Some(Value::Object(message)) => message,
        _ => Map::new(),
    };
    let role = message
        .remove("role")
        .filter(Value::is_string)
        .unwrap_or_else(|| json!("assistant"));
    let content = message.remove("content").map(flatten_content).unwrap_or_default();
    let existing_calls = message
        .remove("tool_calls")
        .filter(|calls| calls.as_array().is_some_and(|a| !a.is_empty()));

    let chars = content.chars().count();
    let mut rebuilt = Map::new();
    rebuilt.insert("role".to_string(), role);

    let recovered = match (&existing_calls, policy) {
        (None, Some(policy)) => resolve_tool_call(&content, policy),
        _ => None,
    };
    if let Some(call) = recovered {
        debug!(tool = %call.name, "Embedding recovered tool call");
        let id = format!("call_{}", chrono::Utc::now().timestamp_millis());
        rebuilt.insert("content".to_string(), json!(""));
        rebuilt.insert("refusal".to_string(), Value::Null);
        rebuilt.insert("tool_calls".to_string(), json!([call.into_wire(id)]));
    } else {
        rebuilt.insert("content".to_string(), Value::String(content));
        rebuilt.insert("refusal".to_string(), Value::Null);
        if let Some(calls) = existing_calls {
            rebuilt.insert("tool_calls".to_string(), calls);
        }
    }

    choice.insert("message".to_string(), Value::Object(rebuilt));
    chars
}

/// Rough usage when the upstream reports none: four characters per token.
pub fn estimate_usage(content_chars: usize) -> Usage {
    let completion_tokens = (content_chars as u64 / 4).max(1);
    Usage {
        prompt_tokens: PLACEHOLDER_PROMPT_TOKENS,
        completion_tokens,
        total_tokens: PLACEHOLDER_PROMPT_TOKENS + completion_tokens,
    }
}

/// Insert `key` when it is absent or null.
fn set_default(map: &mut Map<String, Value>, key: &str, value: impl FnOnce() -> Value) {
    if map.get(key).is_none_or(Value::is_null) {
        map.insert(key.to_string(), value());
    }
}
