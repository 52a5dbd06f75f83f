//! Request sanitizer for `/v1/chat/completions`.
//!
//! Turns a request in the client's full dialect into the minimal shape the
//! upstream can process: unknown fields dropped, content flattened, history
//! cut to the last few user turns, the system prompt replaced, `stream`
//! forced off and `max_tokens` clamped.

pub mod prompt;
pub mod skills;

use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::SanitizerConfig;
use crate::tools::{IntentDetector, ToolPolicy};

pub use prompt::{MINIMAL_SYSTEM_PROMPT, ToolDeclaration, extract_tool_declarations};

/// Top-level request fields accepted from the client.
pub const ALLOWED_CHAT_FIELDS: &[&str] = &[
    "model",
    "messages",
    "temperature",
    "top_p",
    "n",
    "stream",
    "max_tokens",
    "max_completion_tokens",
    "presence_penalty",
    "frequency_penalty",
    "seed",
    "tools",
    "tool_choice",
    "parallel_tool_calls",
];

/// Per-message fields accepted from the client.
pub const ALLOWED_MESSAGE_FIELDS: &[&str] = &["role", "content", "name", "tool_calls", "tool_call_id"];

/// Sampling fields that must be numbers to be forwarded.
const NUMERIC_FIELDS: &[&str] = &[
    "temperature",
    "top_p",
    "presence_penalty",
    "frequency_penalty",
    "seed",
];

/// Result of sanitizing one request body.
#[derive(Debug, Clone)]
pub struct SanitizedRequest {
    /// Bytes to forward upstream.
    pub body: Bytes,
    /// The body was not a JSON object and is forwarded unchanged.
    pub passthrough: bool,
    /// The client asked for `stream: true`.
    pub client_stream: bool,
    /// Requested model, if any.
    pub model: Option<String>,
    /// Set when the latest user message showed tool intent.
    pub tool_policy: Option<ToolPolicy>,
    /// The synthesized system message, when messages were rebuilt.
    pub system_prompt: Option<String>,
    /// Total length of the client's own system messages.
    pub original_system_chars: usize,
}

impl SanitizedRequest {
    fn passthrough(body: &[u8]) -> Self {
        Self {
            body: Bytes::copy_from_slice(body),
            passthrough: true,
            client_stream: false,
            model: None,
            tool_policy: None,
            system_prompt: None,
            original_system_chars: 0,
        }
    }
}

/// Stateless request rewriter built from [`SanitizerConfig`].
#[derive(Debug, Clone)]
pub struct Sanitizer {
    config: SanitizerConfig,
    intent: IntentDetector,
}

impl Sanitizer {
    pub fn new(config: SanitizerConfig) -> Self {
        let intent = IntentDetector::new(&config.intent_keywords);
        Self { config, intent }
    }

    pub const fn config(&self) -> &SanitizerConfig {
        &self.config
    }

    /// Rewrite a raw chat request body.
    pub fn sanitize(&self, body: &[u8]) -> SanitizedRequest {
        let mut obj = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(obj)) => obj,
            Ok(_) => {
                warn!("Chat request body is not a JSON object; forwarding unchanged");
                return SanitizedRequest::passthrough(body);
            }
            Err(e) => {
                warn!("Chat request body is not valid JSON ({e}); forwarding unchanged");
                return SanitizedRequest::passthrough(body);
            }
        };

        retain_recognized_fields(&mut obj);
        let tools = take_tool_fields(&mut obj);
        let messages = take_messages(&mut obj);

        let client_stream = obj.get("stream") == Some(&Value::Bool(true));
        obj.insert("stream".to_string(), Value::Bool(false));
        resolve_max_tokens(&mut obj, self.config.max_tokens_ceiling);
        clamp_choice_count(&mut obj);

        let tool_policy = messages
            .as_deref()
            .and_then(latest_user_content)
            .filter(|text| self.intent.detects(text))
            .map(|_| {
                let declared = tools
                    .as_ref()
                    .map(extract_tool_declarations)
                    .unwrap_or_default();
                (ToolPolicy::new(declared.iter().map(|t| t.name.clone())), declared)
            });

        let mut system_prompt = None;
        let mut original_system_chars = 0;
        if let Some(messages) = messages {
            let original_system = system_texts(&messages);
            original_system_chars = original_system.iter().map(|s| s.chars().count()).sum();

            let prompt = self.system_prompt(
                tool_policy.as_ref().map(|(_, declared)| declared.as_slice()),
                &original_system.join("\n\n"),
            );
            if shrinks_system_prompt(original_system_chars) {
                info!(
                    from = original_system_chars,
                    to = prompt.chars().count(),
                    "Replaced system prompt"
                );
            }

            let mut rebuilt = vec![system_message(&prompt)];
            rebuilt.extend(retain_user_history(messages, self.config.max_history_messages));
            obj.insert("messages".to_string(), Value::Array(rebuilt));
            system_prompt = Some(prompt);
        }

        let model = obj.get("model").and_then(Value::as_str).map(str::to_string);
        let body = match serde_json::to_vec(&Value::Object(obj)) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!("Failed to serialize sanitized request ({e}); forwarding unchanged");
                return SanitizedRequest::passthrough(body);
            }
        };

        SanitizedRequest {
            body,
            passthrough: false,
            client_stream,
            model,
            tool_policy: tool_policy.map(|(policy, _)| policy),
            system_prompt,
            original_system_chars,
        }
    }

    /// Build the system message; tools and skills only on tool intent.
    fn system_prompt(&self, tools: Option<&[ToolDeclaration]>, original_system: &str) -> String {
        let Some(tools) = tools else {
            return prompt::build_system_prompt(None, None, None);
        };

        let tool_prompt = prompt::build_tool_prompt(tools, self.config.max_tool_count);
        let skills_block = skills::extract_skills_block(original_system).or_else(|| {
            let dir = self.config.skills_dir.as_deref()?;
            skills::render_skills_block(&skills::discover_skills(dir))
        });
        let details = self
            .config
            .skills_dir
            .as_deref()
            .and_then(|dir| skills::skill_details(dir, &self.config.skill_detail_names));

        debug!(
            tools = tools.len(),
            skills = skills_block.is_some(),
            details = details.is_some(),
            "Tool intent detected; extending system prompt"
        );
        prompt::build_system_prompt(
            tool_prompt.as_deref(),
            skills_block.as_deref(),
            details.as_deref(),
        )
    }
}

/// Drop unknown and null-valued fields, and ill-typed scalars.
fn retain_recognized_fields(obj: &mut Map<String, Value>) {
    obj.retain(|key, value| {
        if value.is_null() || !ALLOWED_CHAT_FIELDS.contains(&key.as_str()) {
            return false;
        }
        match key.as_str() {
            "model" => value.is_string(),
            k if NUMERIC_FIELDS.contains(&k) => value.is_number(),
            _ => true,
        }
    });
}

/// Remove every tool field, returning the declarations.
fn take_tool_fields(obj: &mut Map<String, Value>) -> Option<Value> {
    obj.remove("tool_choice");
    obj.remove("parallel_tool_calls");
    obj.remove("tools")
}

/// Pull out and normalize the message list.
fn take_messages(obj: &mut Map<String, Value>) -> Option<Vec<Value>> {
    match obj.remove("messages")? {
        Value::Array(items) => Some(items.into_iter().filter_map(normalize_message).collect()),
        _ => {
            debug!("Dropping non-array messages field");
            None
        }
    }
}

/// Keep recognized fields, flatten content, default it to `""`.
pub fn normalize_message(message: Value) -> Option<Value> {
    let Value::Object(mut msg) = message else {
        return None;
    };
    msg.retain(|key, _| ALLOWED_MESSAGE_FIELDS.contains(&key.as_str()));
    let content = msg.remove("content").map(flatten_content).unwrap_or_default();
    msg.insert("content".to_string(), Value::String(content));
    Some(Value::Object(msg))
}

/// Collapse list-of-parts content into newline-joined text.
pub fn flatten_content(content: Value) -> String {
    match content {
        Value::String(text) => text,
        Value::Array(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text),
                Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("text") => {
                    Some(obj.get("text").and_then(Value::as_str).unwrap_or_default().to_string())
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Pick a positive token limit and clamp it to `ceiling`.
fn resolve_max_tokens(obj: &mut Map<String, Value>, ceiling: u64) {
    let requested = obj
        .get("max_tokens")
        .and_then(positive_integer)
        .or_else(|| obj.get("max_completion_tokens").and_then(positive_integer));
    let max_tokens = requested.map_or(ceiling, |n| n.min(ceiling));
    obj.insert("max_tokens".to_string(), Value::from(max_tokens));
    obj.remove("max_completion_tokens");
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn positive_integer(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite() && *f >= 1.0).map(|f| f as u64))
        .filter(|n| *n > 0)
}

/// The upstream generates a single choice.
fn clamp_choice_count(obj: &mut Map<String, Value>) {
    match obj.get("n").map(Value::as_f64) {
        Some(Some(n)) if n > 1.0 => {
            obj.insert("n".to_string(), Value::from(1));
        }
        Some(None) => {
            obj.remove("n");
        }
        _ => {}
    }
}

fn role(message: &Value) -> Option<&str> {
    message.get("role").and_then(Value::as_str)
}

fn content(message: &Value) -> &str {
    message.get("content").and_then(Value::as_str).unwrap_or_default()
}

fn latest_user_content(messages: &[Value]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| role(m) == Some("user"))
        .map(content)
}

fn system_texts(messages: &[Value]) -> Vec<&str> {
    messages
        .iter()
        .filter(|m| role(m) == Some("system"))
        .map(content)
        .collect()
}

/// Only the most recent `keep` user messages survive.
pub fn retain_user_history(messages: Vec<Value>, keep: usize) -> Vec<Value> {
    let mut users: Vec<Value> = messages
        .into_iter()
        .filter(|m| role(m) == Some("user"))
        .collect();
    let skip = users.len().saturating_sub(keep);
    users.drain(..skip);
    users
}

/// Whether the client's system text is longer than what replaces it.
fn shrinks_system_prompt(original_chars: usize) -> bool {
    original_chars > MINIMAL_SYSTEM_PROMPT.chars().count()
}

fn system_message(content: &str) -> Value {
    serde_json::json!({"role": "system", "content": content})
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sanitizer() -> Sanitizer {
        Sanitizer::new(SanitizerConfig::default())
    }

    fn sanitize_json(sanitizer: &Sanitizer, body: &Value) -> (SanitizedRequest, Value) {
        let result = sanitizer.sanitize(&serde_json::to_vec(body).unwrap());
        let forwarded = serde_json::from_slice(&result.body).unwrap();
        (result, forwarded)
    }

    #[test]
    fn test_non_object_bodies_pass_through() {
        let s = sanitizer();
        let result = s.sanitize(b"not json");
        assert!(result.passthrough);
        assert_eq!(&result.body[..], b"not json");

        let result = s.sanitize(b"[1, 2]");
        assert!(result.passthrough);
        assert_eq!(&result.body[..], b"[1, 2]");
    }

    #[test]
    fn test_only_recognized_fields_survive() {
        let (result, out) = sanitize_json(
            &sanitizer(),
            &json!({
                "model": "qwen2:1.5b",
                "messages": [{"role": "user", "content": "hi", "extra": 1}],
                "stream": true,
                "stream_options": {"include_usage": true},
                "store": false,
                "temperature": 0.2,
                "top_p": "high",
                "seed": null,
                "tools": [],
                "tool_choice": "auto",
                "parallel_tool_calls": true
            }),
        );
        let keys: Vec<&str> = out.as_object().unwrap().keys().map(String::as_str).collect();
        for key in &keys {
            assert!(ALLOWED_CHAT_FIELDS.contains(key), "unexpected field {key}");
        }
        for dropped in ["stream_options", "store", "top_p", "seed", "tools", "tool_choice", "parallel_tool_calls"] {
            assert!(out.get(dropped).is_none(), "{dropped} should be dropped");
        }
        assert_eq!(out["stream"], false);
        assert!(result.client_stream);
        assert_eq!(result.model.as_deref(), Some("qwen2:1.5b"));
        assert_eq!(out["messages"][1], json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_content_flattening() {
        let msg = normalize_message(json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "first"},
                {"type": "image_url", "image_url": {"url": "data:..."}},
                "second",
                {"type": "text"}
            ]
        }))
        .unwrap();
        assert_eq!(msg["content"], "first\nsecond\n");

        let msg = normalize_message(json!({"role": "assistant", "content": null})).unwrap();
        assert_eq!(msg["content"], "");
        let msg = normalize_message(json!({"role": "assistant"})).unwrap();
        assert_eq!(msg["content"], "");
        assert!(normalize_message(json!("loose string")).is_none());
    }

    #[test]
    fn test_max_tokens_resolution() {
        let s = sanitizer();
        let ceiling = s.config().max_tokens_ceiling;

        let (_, out) = sanitize_json(&s, &json!({"messages": [], "max_tokens": 100_000}));
        assert_eq!(out["max_tokens"], ceiling);

        let (_, out) = sanitize_json(&s, &json!({"messages": [], "max_tokens": 64}));
        assert_eq!(out["max_tokens"], 64);

        let (_, out) = sanitize_json(
            &s,
            &json!({"messages": [], "max_tokens": 0, "max_completion_tokens": 32}),
        );
        assert_eq!(out["max_tokens"], 32);
        assert!(out.get("max_completion_tokens").is_none());

        let (_, out) = sanitize_json(&s, &json!({"messages": [], "max_tokens": "lots"}));
        assert_eq!(out["max_tokens"], ceiling);
    }

    #[test]
    fn test_choice_count_clamped() {
        let s = sanitizer();
        let (_, out) = sanitize_json(&s, &json!({"messages": [], "n": 4}));
        assert_eq!(out["n"], 1);
        let (_, out) = sanitize_json(&s, &json!({"messages": [], "n": 1}));
        assert_eq!(out["n"], 1);
        let (_, out) = sanitize_json(&s, &json!({"messages": [], "n": "two"}));
        assert!(out.get("n").is_none());
    }

    #[test]
    fn test_history_keeps_last_user_turns() {
        let s = Sanitizer::new(SanitizerConfig {
            max_history_messages: 2,
            ..SanitizerConfig::default()
        });
        let long_system = "You are OpenClaw. ".repeat(40);
        let (result, out) = sanitize_json(
            &s,
            &json!({"messages": [
                {"role": "system", "content": long_system},
                {"role": "user", "content": "one"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": "two"},
                {"role": "tool", "content": "output", "tool_call_id": "x"},
                {"role": "system", "content": "second system"},
                {"role": "user", "content": "three"}
            ]}),
        );
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], MINIMAL_SYSTEM_PROMPT);
        assert_eq!(messages[1]["content"], "two");
        assert_eq!(messages[2]["content"], "three");
        assert_eq!(
            messages.iter().filter(|m| m["role"] == "system").count(),
            1
        );
        assert_eq!(
            result.original_system_chars,
            long_system.len() + "second system".len()
        );
    }

    #[test]
    fn test_no_tool_block_without_intent() {
        let (result, out) = sanitize_json(
            &sanitizer(),
            &json!({
                "messages": [{"role": "user", "content": "What is the capital of France?"}],
                "tools": [{"type": "function", "function": {"name": "exec"}}]
            }),
        );
        assert!(result.tool_policy.is_none());
        assert_eq!(out["messages"][0]["content"], MINIMAL_SYSTEM_PROMPT);
    }

    #[test]
    fn test_tool_block_with_intent() {
        let (result, out) = sanitize_json(
            &sanitizer(),
            &json!({
                "messages": [
                    {"role": "user", "content": "hello"},
                    {"role": "user", "content": [{"type": "text", "text": "Please run the backup"}]}
                ],
                "tools": [{"type": "function", "function": {
                    "name": "exec",
                    "description": "Run a command",
                    "parameters": {"properties": {"command": {"type": "string"}}}
                }}]
            }),
        );
        let policy = result.tool_policy.unwrap();
        assert!(policy.declared.contains("exec"));

        let system = out["messages"][0]["content"].as_str().unwrap();
        assert!(system.starts_with(MINIMAL_SYSTEM_PROMPT));
        assert!(system.contains("- exec: Run a command (args: command)"));
        assert_eq!(result.system_prompt.as_deref(), Some(system));
        assert!(out.get("tools").is_none());
    }

    #[test]
    fn test_skills_block_from_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let skill = tmp.path().join("molt_tools");
        std::fs::create_dir_all(&skill).unwrap();
        std::fs::write(
            skill.join("SKILL.md"),
            "---\nname: molt\ndescription: Post to the feed\n---\nRun post.py",
        )
        .unwrap();

        let s = Sanitizer::new(SanitizerConfig {
            skills_dir: Some(tmp.path().to_path_buf()),
            skill_detail_names: vec!["molt_tools".to_string()],
            ..SanitizerConfig::default()
        });
        let (result, _) = sanitize_json(
            &s,
            &json!({"messages": [{"role": "user", "content": "use the molt skill"}]}),
        );
        let system = result.system_prompt.unwrap();
        assert!(system.contains("Available skills:\n<available_skills>"));
        assert!(system.contains("<name>molt</name>"));
        assert!(system.contains("<description>Post to the feed</description>"));
        assert!(system.contains("## Skill: molt_tools\n---"));
        assert!(!system.contains("Tool usage:"));
    }

    #[test]
    fn test_client_skills_block_preferred() {
        let (result, _) = sanitize_json(
            &sanitizer(),
            &json!({"messages": [
                {"role": "system", "content": "Big prompt <available_skills><skill>x</skill></available_skills>"},
                {"role": "user", "content": "which skill fits?"}
            ]}),
        );
        assert!(
            result
                .system_prompt
                .unwrap()
                .contains("<available_skills>\n<skill>x</skill>\n</available_skills>")
        );
    }

    #[test]
    fn test_system_length_counts_characters() {
        let minimal = MINIMAL_SYSTEM_PROMPT.chars().count();
        let (result, _) = sanitize_json(
            &sanitizer(),
            &json!({"messages": [
                {"role": "system", "content": "é".repeat(minimal)},
                {"role": "user", "content": "hi"}
            ]}),
        );
        assert_eq!(result.original_system_chars, minimal);
        assert!(!shrinks_system_prompt(result.original_system_chars));
        assert!(shrinks_system_prompt(minimal + 1));
    }

    #[test]
    fn test_missing_messages_left_absent() {
        let (result, out) = sanitize_json(&sanitizer(), &json!({"model": "m", "messages": "oops"}));
        assert!(out.get("messages").is_none());
        assert!(result.system_prompt.is_none());
    }
}
