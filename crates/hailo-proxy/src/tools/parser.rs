//! Recovering a tool call from free-form model output.
//!
//! Small models rarely produce clean JSON. Parsing runs through an ordered
//! list of strategies, loosest last, and stops at the first one that yields
//! a valid call.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::ToolCall;

/// Keys that may carry the tool name, in priority order.
const NAME_KEYS: &[&str] = &["tool", "name", "tool_name", "skill"];

/// Keys that may carry the argument object, in priority order.
const ARGUMENT_KEYS: &[&str] = &["arguments", "args", "parameters"];

/// Argument keys recovered by the regex fallback.
const KNOWN_ARGUMENT_KEYS: &[&str] = &["command", "file_path", "path", "message", "sessionKey"];

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:tool|name|tool_name|skill)"\s*:\s*"((?:[^"\\]|\\.)*)""#)
        .expect("tool name pattern is valid")
});

static ARGUMENT_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    KNOWN_ARGUMENT_KEYS
        .iter()
        .map(|key| {
            let pattern = format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)""#, regex::escape(key));
            (*key, Regex::new(&pattern).expect("argument pattern is valid"))
        })
        .collect()
});

/// One way of pulling a tool call out of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// The whole text (minus a code fence) is one JSON object.
    WholeText,
    /// The first balanced `{...}` span is a JSON object.
    BalancedBraces,
    /// Regex extraction of well-known keys straight from the text.
    KeyPatterns,
}

impl ParseStrategy {
    /// Strategies in the order they are tried.
    pub const ORDER: [Self; 3] = [Self::WholeText, Self::BalancedBraces, Self::KeyPatterns];

    pub fn apply(self, text: &str) -> Option<ToolCall> {
        match self {
            Self::WholeText => parse_object(strip_code_fence(text)),
            Self::BalancedBraces => first_balanced_object(text).and_then(parse_object),
            Self::KeyPatterns => scan_key_patterns(text),
        }
    }
}

/// Try every strategy in order; the first valid call wins.
pub fn parse_tool_call(text: &str) -> Option<ToolCall> {
    if text.trim().is_empty() {
        return None;
    }
    ParseStrategy::ORDER
        .iter()
        .find_map(|strategy| strategy.apply(text))
}

/// Strip a leading code fence with an optional `json` tag, and a trailing fence.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches('`');
    let rest = match rest.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
        _ => rest,
    };
    rest.trim().trim_end_matches('`').trim()
}

fn parse_object(candidate: &str) -> Option<ToolCall> {
    match serde_json::from_str::<Value>(candidate).ok()? {
        Value::Object(obj) => tool_call_from_object(&obj),
        _ => None,
    }
}

/// Build a call from a decoded object; `None` unless the name is non-empty
/// and the arguments (if any) are an object.
pub(crate) fn tool_call_from_object(obj: &Map<String, Value>) -> Option<ToolCall> {
    let name = NAME_KEYS
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|name| !name.is_empty())?;

    let arguments = match ARGUMENT_KEYS.iter().find_map(|key| obj.get(*key)) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(args)) => args.clone(),
        // Some models double-encode the arguments.
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw).ok()? {
            Value::Object(args) => args,
            _ => return None,
        },
        Some(_) => return None,
    };

    Some(ToolCall {
        name: name.to_string(),
        arguments,
    })
}

/// Return the first `{...}` span whose braces balance, ignoring braces
/// inside string literals.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn scan_key_patterns(text: &str) -> Option<ToolCall> {
    let name = NAME_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| unescape(m.as_str())))
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())?;

    let mut arguments = Map::new();
    for (key, pattern) in ARGUMENT_PATTERNS.iter() {
        if let Some(value) = pattern.captures(text).and_then(|caps| caps.get(1)) {
            arguments.insert((*key).to_string(), Value::String(unescape(value.as_str())));
        }
    }

    Some(ToolCall { name, arguments })
}

/// Decode JSON string escapes, falling back to the raw text.
fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.to_string())
}
