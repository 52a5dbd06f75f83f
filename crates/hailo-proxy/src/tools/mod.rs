//! Tool calls recovered from plain model text.
//!
//! The upstream cannot emit structured tool calls. Instead the sanitizer
//! asks the model to answer with a small JSON object, and this module turns
//! that text back into a call the client SDK understands.

pub mod intent;
pub mod parser;
pub mod remap;

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::{info, warn};

pub use intent::IntentDetector;
pub use parser::{ParseStrategy, parse_tool_call};
pub use remap::{normalize_exec_command, remap_tool_call};

use crate::models;

/// A tool invocation recovered from model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Wire form with a fresh call id and the arguments serialized to text.
    pub fn into_wire(self, id: String) -> models::ToolCall {
        models::ToolCall {
            id,
            r#type: "function".to_string(),
            function: models::ToolCallFunction {
                name: self.name,
                arguments: Value::Object(self.arguments).to_string(),
            },
        }
    }
}

/// Tool handling state for one request.
///
/// Present only when the latest user message showed tool intent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPolicy {
    /// Names the client declared in `tools`.
    pub declared: BTreeSet<String>,
}

impl ToolPolicy {
    pub fn new<I: IntoIterator<Item = String>>(declared: I) -> Self {
        Self {
            declared: declared.into_iter().collect(),
        }
    }
}

/// Parse `text` and apply the remapping rules.
///
/// Unknown names are kept: the client decides what to do with them.
pub fn resolve_tool_call(text: &str, policy: &ToolPolicy) -> Option<ToolCall> {
    let call = parse_tool_call(text)?;

    if !policy.declared.contains(&call.name) {
        warn!(
            tool = %call.name,
            declared = policy.declared.len(),
            "Model requested a tool the client did not declare; forwarding anyway"
        );
    }

    let name = call.name.clone();
    let remapped = remap_tool_call(call);
    if remapped.is_none() {
        info!(tool = %name, "Dropped blocked tool call");
    }
    remapped
}
