//! OpenAI and Ollama wire types produced by the proxy itself.
//!
//! Upstream payloads are handled as `serde_json::Value` because they arrive
//! with missing or oddly typed fields. The types here cover what the proxy
//! fabricates: tool calls, stream chunks, model listings, legacy completion
//! responses and error bodies.

use serde::{Deserialize, Serialize};

// =============================================================================
// Tool Calling Types
// =============================================================================

/// A tool call made by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call.
    pub id: String,
    /// Tool type - always "function".
    pub r#type: String,
    /// Function call details.
    pub function: ToolCallFunction,
}

/// Function call details within a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    /// Name of the function to call.
    pub name: String,
    /// JSON string of arguments.
    pub arguments: String,
}

// =============================================================================
// Chat Completion Types
// =============================================================================

/// Token usage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Streaming chunk for /v1/chat/completions.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: serde_json::Value,
    pub model: String,
    pub system_fingerprint: String,
    pub choices: Vec<ChatChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
}

/// A single streaming choice.
///
/// `logprobs` and `finish_reason` serialize as explicit `null` when unset;
/// some SDKs reject chunks where they are missing.
#[derive(Debug, Clone, Serialize)]
pub struct ChatChunkChoice {
    pub index: u32,
    pub delta: serde_json::Value,
    pub logprobs: Option<serde_json::Value>,
    pub finish_reason: Option<String>,
}

// =============================================================================
// Legacy Completion Types
// =============================================================================

/// Request to /v1/completions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    /// A string, or a list of strings.
    #[serde(default)]
    pub prompt: Option<serde_json::Value>,
    #[serde(default)]
    pub temperature: Option<serde_json::Value>,
    #[serde(default)]
    pub top_p: Option<serde_json::Value>,
    #[serde(default)]
    pub max_tokens: Option<serde_json::Value>,
}

/// Response from /v1/completions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: serde_json::Value,
    pub model: String,
    pub choices: Vec<TextChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
}

/// A single legacy completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChoice {
    pub index: u32,
    pub text: String,
    pub logprobs: Option<serde_json::Value>,
    pub finish_reason: String,
}

// =============================================================================
// Models Endpoint Types
// =============================================================================

/// Response from /v1/models endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

impl ModelsResponse {
    /// Create a new `ModelsResponse` from a list of model names.
    pub fn from_names(names: Vec<String>, created: i64) -> Self {
        Self {
            object: "list".to_string(),
            data: names
                .into_iter()
                .map(|name| ModelInfo::new(name, created))
                .collect(),
        }
    }
}

/// Information about a single model (OpenAI format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, created: i64) -> Self {
        Self {
            id: id.into(),
            object: "model".to_string(),
            created,
            owned_by: "hailo".to_string(),
        }
    }
}

/// Request body of Ollama's `/api/show`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShowRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl ShowRequest {
    /// `name` takes precedence over `model`, mirroring Ollama.
    pub fn effective_model(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.model.as_deref())
            .filter(|m| !m.trim().is_empty())
    }
}

/// Response body of Ollama's `/api/show`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowResponse {
    pub modelfile: String,
    pub parameters: String,
    pub template: String,
    pub details: ShowDetails,
    pub model_info: serde_json::Map<String, serde_json::Value>,
}

/// Model details block inside `/api/show`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowDetails {
    pub parent_model: String,
    pub format: String,
    pub family: String,
    pub families: Vec<String>,
    pub parameter_size: String,
    pub quantization_level: String,
}

// =============================================================================
// Error Response Types
// =============================================================================

/// Error response matching OpenAI format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail within an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// The offending input value, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl ErrorResponse {
    /// Create an error response with a code.
    pub fn with_code(
        message: impl Into<String>,
        error_type: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                r#type: error_type.into(),
                code: Some(code.into()),
                param: None,
            },
        }
    }

    /// Attach the offending value.
    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.error.param = Some(param.into());
        self
    }
}
