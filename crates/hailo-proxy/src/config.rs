//! Runtime configuration for the proxy.
//!
//! Everything here is built once at startup (see the CLI crate) and shared
//! read-only across requests behind an `Arc`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Default upstream base URL (hailo-ollama).
pub const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8000";

/// Default model name used when discovery yields nothing.
pub const DEFAULT_MODEL: &str = "qwen2:1.5b";

/// Upstream generation is slow (single-digit tokens per second).
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Request body cap; clients inline base64 images well past axum's 2 MB default.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Keywords that turn on tool handling for a request.
pub const DEFAULT_INTENT_KEYWORDS: &[&str] = &["tool", "skill", "run ", "execute", "rag"];

/// Headers a browser client may send on cross-origin requests.
pub const DEFAULT_CORS_ALLOWED_HEADERS: &[&str] =
    &["authorization", "content-type", "x-requested-with"];

/// Top-level proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Base URL of the upstream inference server, without trailing slash.
    pub upstream_url: String,
    /// Bound on a single upstream round trip.
    pub upstream_timeout: Duration,
    /// Model name reported when nothing better is known.
    pub default_model: String,
    /// Largest request body read before answering 413.
    pub max_body_bytes: usize,
    /// Host/Origin allow-lists and CORS settings.
    pub security: SecurityPolicy,
    /// On-disk request tracing.
    pub trace: TraceConfig,
    /// Request rewriting limits.
    pub sanitizer: SanitizerConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            default_model: DEFAULT_MODEL.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            security: SecurityPolicy::default(),
            trace: TraceConfig::default(),
            sanitizer: SanitizerConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Join a path onto the upstream base URL.
    pub fn upstream_endpoint(&self, path_and_query: &str) -> String {
        format!("{}{}", self.upstream_url.trim_end_matches('/'), path_and_query)
    }
}

/// Host and Origin allow-lists, read on every request.
///
/// Entries are stored lowercased; lookups lowercase the inbound value.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub allowed_hosts: HashSet<String>,
    pub allowed_origins: HashSet<String>,
    /// Accept requests that carry no `Origin` header (curl, SDKs).
    pub allow_missing_origin: bool,
    /// Value list for `Access-Control-Allow-Headers`.
    pub cors_allowed_headers: Vec<String>,
    /// Preflight cache duration in seconds.
    pub cors_max_age: u64,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allowed_hosts: ["localhost", "127.0.0.1"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            allowed_origins: HashSet::new(),
            allow_missing_origin: true,
            cors_allowed_headers: DEFAULT_CORS_ALLOWED_HEADERS
                .iter()
                .map(|h| (*h).to_string())
                .collect(),
            cors_max_age: 600,
        }
    }
}

impl SecurityPolicy {
    /// Build a policy from raw lists, normalizing case and whitespace.
    pub fn new<H, O>(hosts: H, origins: O, allow_missing_origin: bool) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        O: IntoIterator,
        O::Item: AsRef<str>,
    {
        Self {
            allowed_hosts: normalize_set(hosts),
            allowed_origins: normalize_set(origins),
            allow_missing_origin,
            ..Self::default()
        }
    }

    /// Replace the `Access-Control-Allow-Headers` list; an empty list keeps the defaults.
    #[must_use]
    pub fn with_cors_allowed_headers<I>(mut self, headers: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let headers: Vec<String> = headers
            .into_iter()
            .map(|h| h.as_ref().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        if !headers.is_empty() {
            self.cors_allowed_headers = headers;
        }
        self
    }

    pub fn host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts.contains(&host.trim().to_ascii_lowercase())
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins
            .contains(&origin.trim().trim_end_matches('/').to_ascii_lowercase())
    }
}

fn normalize_set<I>(items: I) -> HashSet<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().trim().trim_end_matches('/').to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Trace artifact settings.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Per-artifact byte cap; larger payloads are truncated with a marker.
    pub max_bytes: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: std::env::temp_dir().join("hailo-proxy-trace"),
            max_bytes: 64 * 1024,
        }
    }
}

/// Limits and prompt inputs for the request sanitizer.
#[derive(Debug, Clone)]
pub struct SanitizerConfig {
    /// Hard ceiling for `max_tokens` sent upstream.
    pub max_tokens_ceiling: u64,
    /// Number of trailing user messages kept.
    pub max_history_messages: usize,
    /// Number of tools listed in the tool-usage block.
    pub max_tool_count: usize,
    /// Substrings of the latest user message that enable tool handling.
    pub intent_keywords: Vec<String>,
    /// Workspace directory holding `<skill>/SKILL.md` files.
    pub skills_dir: Option<PathBuf>,
    /// Skills whose full SKILL.md text is inlined into the system prompt.
    pub skill_detail_names: Vec<String>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_tokens_ceiling: 512,
            max_history_messages: 1,
            max_tool_count: 8,
            intent_keywords: DEFAULT_INTENT_KEYWORDS
                .iter()
                .map(|k| (*k).to_string())
                .collect(),
            skills_dir: None,
            skill_detail_names: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_normalizes_entries() {
        let policy = SecurityPolicy::new(
            ["LocalHost:8081 ", ""],
            ["http://Example.com/"],
            false,
        );
        assert!(policy.host_allowed("localhost:8081"));
        assert!(!policy.host_allowed(""));
        assert!(policy.origin_allowed("http://example.com"));
        assert!(!policy.allow_missing_origin);
    }

    #[test]
    fn test_cors_headers_override() {
        let policy = SecurityPolicy::default()
            .with_cors_allowed_headers([" X-Api-Key", "", "Content-Type"]);
        assert_eq!(policy.cors_allowed_headers, vec!["x-api-key", "content-type"]);

        let unchanged =
            SecurityPolicy::default().with_cors_allowed_headers(Vec::<String>::new());
        assert_eq!(unchanged.cors_allowed_headers.len(), DEFAULT_CORS_ALLOWED_HEADERS.len());
    }

    #[test]
    fn test_upstream_endpoint_joins_cleanly() {
        let config = ProxyConfig {
            upstream_url: "http://127.0.0.1:8000/".to_string(),
            ..ProxyConfig::default()
        };
        assert_eq!(
            config.upstream_endpoint("/api/tags"),
            "http://127.0.0.1:8000/api/tags"
        );
    }
}
