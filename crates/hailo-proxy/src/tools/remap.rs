//! Post-processing of recovered tool calls.

use serde_json::Value;

use super::ToolCall;

/// Tools the small model cannot drive: it never supplies usable arguments
/// for them, so their calls are dropped instead of sent to the client.
pub const BLOCKED_TOOLS: &[&str] = &[
    "read",
    "write",
    "edit",
    "apply_patch",
    "grep",
    "find",
    "ls",
    "glob",
    "web_search",
    "web_fetch",
    "process",
    "sessions_list",
    "sessions_history",
    "sessions_spawn",
    "session_status",
];

/// The shell-execution tool, whose command gets normalized.
pub const EXEC_TOOL: &str = "exec";

/// Interpreters that may prefix a script invocation, stripped once.
const INTERPRETERS: &[&str] = &["python3", "python", "bash", "sh", "node"];

/// Script extension to canonical interpreter.
const SCRIPT_INTERPRETERS: &[(&str, &str)] = &[(".py", "python3"), (".sh", "bash"), (".js", "node")];

pub fn is_blocked(name: &str) -> bool {
    BLOCKED_TOOLS.contains(&name)
}

/// Apply the block list and exec normalization.
///
/// Returns `None` when the call must not reach the client.
pub fn remap_tool_call(mut call: ToolCall) -> Option<ToolCall> {
    if is_blocked(&call.name) {
        return None;
    }
    if call.name == EXEC_TOOL {
        if let Some(Value::String(command)) = call.arguments.get_mut("command") {
            *command = normalize_exec_command(command);
        }
    }
    Some(call)
}

/// Canonicalize how a script is invoked.
///
/// `script.py` → `python3 script.py`, `python script.py` →
/// `python3 script.py`, `sh run.sh --x` → `bash run.sh --x`. Commands that do
/// not target a script are returned trimmed but otherwise untouched.
pub fn normalize_exec_command(command: &str) -> String {
    let trimmed = command.trim();
    let bare = strip_interpreter(trimmed).unwrap_or(trimmed);

    let script = bare.split_whitespace().next().unwrap_or_default();
    SCRIPT_INTERPRETERS
        .iter()
        .find(|(ext, _)| script.len() > ext.len() && script.ends_with(ext))
        .map_or_else(
            || trimmed.to_string(),
            |(_, interpreter)| format!("{interpreter} {bare}"),
        )
}

/// Remove one leading interpreter word, returning the remainder.
fn strip_interpreter(command: &str) -> Option<&str> {
    let (first, rest) = command.split_once(char::is_whitespace)?;
    INTERPRETERS
        .contains(&first)
        .then_some(rest.trim_start())
        .filter(|rest| !rest.is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;

    fn call(name: &str, arguments: Value) -> ToolCall {
        let Value::Object(arguments) = arguments else {
            panic!("arguments must be an object");
        };
        ToolCall {
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn test_blocked_tools_are_dropped() {
        assert!(remap_tool_call(call("read", json!({"path": "/etc/passwd"}))).is_none());
        assert!(remap_tool_call(call("sessions_list", json!({}))).is_none());
    }

    #[test]
    fn test_other_tools_pass_through() {
        let original = call("message", json!({"message": "hi"}));
        assert_eq!(remap_tool_call(original.clone()), Some(original));
    }

    #[test]
    fn test_exec_command_gets_interpreter() {
        let remapped = remap_tool_call(call("exec", json!({"command": "script.py"}))).unwrap();
        assert_eq!(remapped.arguments["command"], "python3 script.py");
    }

    #[test]
    fn test_exec_without_command_is_kept() {
        let remapped = remap_tool_call(call("exec", json!({}))).unwrap();
        assert_eq!(remapped.arguments, Map::new());
    }

    #[test]
    fn test_normalize_exec_command() {
        assert_eq!(normalize_exec_command("script.py"), "python3 script.py");
        assert_eq!(normalize_exec_command("python script.py -v"), "python3 script.py -v");
        assert_eq!(normalize_exec_command("python3 tools/check.py"), "python3 tools/check.py");
        assert_eq!(normalize_exec_command("sh deploy.sh"), "bash deploy.sh");
        assert_eq!(normalize_exec_command("node app.js"), "node app.js");
        assert_eq!(normalize_exec_command(" ls -la "), "ls -la");
        assert_eq!(normalize_exec_command("python -c 'print(1)'"), "python -c 'print(1)'");
        assert_eq!(normalize_exec_command(".py"), ".py");
    }
}
