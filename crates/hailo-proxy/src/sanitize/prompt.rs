//! System prompt synthesis.
//!
//! Clients send system prompts far larger than the upstream's context
//! window. They are replaced by a fixed minimal instruction, optionally
//! followed by a compact tool list and the workspace skills.

use serde_json::Value;

/// The instruction every forwarded request starts with.
pub const MINIMAL_SYSTEM_PROMPT: &str = "You are a helpful personal assistant. \
    Answer the user's questions concisely and helpfully. \
    If you don't know something, say so.";

/// Tool descriptions are cut to this many characters.
pub const MAX_TOOL_DESCRIPTION_CHARS: usize = 120;

/// A function tool declared by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// Sorted parameter property names.
    pub parameters: Vec<String>,
}

/// Read `{"type": "function", "function": {...}}` entries from `tools`.
///
/// Entries of any other shape are skipped.
pub fn extract_tool_declarations(tools: &Value) -> Vec<ToolDeclaration> {
    let Some(entries) = tools.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter(|tool| tool.get("type").and_then(Value::as_str) == Some("function"))
        .filter_map(|tool| {
            let function = tool.get("function")?;
            let name = function.get("name")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }
            let description = function
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .replace('\n', " ");
            let mut parameters: Vec<String> = function
                .get("parameters")
                .and_then(|p| p.get("properties"))
                .and_then(Value::as_object)
                .map(|props| props.keys().cloned().collect())
                .unwrap_or_default();
            parameters.sort();

            Some(ToolDeclaration {
                name: name.to_string(),
                description,
                parameters,
            })
        })
        .collect()
}

/// Render the tool-usage block, listing at most `max_tools` tools.
pub fn build_tool_prompt(tools: &[ToolDeclaration], max_tools: usize) -> Option<String> {
    if tools.is_empty() {
        return None;
    }

    let mut lines = vec![
        "Tool usage:".to_string(),
        "- If a tool is needed, respond ONLY with JSON:".to_string(),
        r#"  {"tool": "<name>", "arguments": { ... }}"#.to_string(),
        "- Otherwise, respond normally.".to_string(),
        "Available tools:".to_string(),
    ];
    for tool in tools.iter().take(max_tools) {
        let mut line = format!("- {}", tool.name);
        if !tool.description.is_empty() {
            line.push_str(": ");
            line.push_str(&truncate_chars(&tool.description, MAX_TOOL_DESCRIPTION_CHARS));
        }
        if !tool.parameters.is_empty() {
            line.push_str(&format!(" (args: {})", tool.parameters.join(", ")));
        }
        lines.push(line);
    }
    if tools.len() > max_tools {
        lines.push("- ...".to_string());
    }
    Some(lines.join("\n"))
}

/// Assemble the final system message content.
pub fn build_system_prompt(
    tool_prompt: Option<&str>,
    skills_block: Option<&str>,
    skill_details: Option<&str>,
) -> String {
    let mut content = MINIMAL_SYSTEM_PROMPT.to_string();
    if let Some(tools) = tool_prompt {
        content.push_str("\n\n");
        content.push_str(tools);
    }
    if let Some(skills) = skills_block {
        content.push_str("\n\nAvailable skills:\n");
        content.push_str(skills);
    }
    if let Some(details) = skill_details {
        content.push_str("\n\n");
        content.push_str(details);
    }
    content
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}
