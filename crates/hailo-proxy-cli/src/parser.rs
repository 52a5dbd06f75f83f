//! Command-line and environment configuration.
//!
//! Every flag has a `HAILO_PROXY_*` environment variable; list values are
//! comma-separated in both forms.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use hailo_proxy::config::{
    DEFAULT_CORS_ALLOWED_HEADERS, DEFAULT_INTENT_KEYWORDS, DEFAULT_MAX_BODY_BYTES, DEFAULT_MODEL,
    DEFAULT_UPSTREAM_URL, SanitizerConfig, TraceConfig,
};
use hailo_proxy::{ProxyConfig, SecurityPolicy};

/// Sanitizing OpenAI-compatible proxy for hailo-ollama.
#[derive(Parser, Debug)]
#[command(name = "hailo-proxy")]
#[command(about = "Sanitizing OpenAI-compatible proxy for small-context local inference servers")]
#[command(version)]
pub struct Cli {
    /// Address to bind to
    #[arg(long, env = "HAILO_PROXY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the proxy to
    #[arg(short, long, env = "HAILO_PROXY_PORT", default_value_t = 8081)]
    pub port: u16,

    /// Base URL of the upstream inference server
    #[arg(long, env = "HAILO_PROXY_UPSTREAM", default_value = DEFAULT_UPSTREAM_URL)]
    pub upstream: String,

    /// Seconds to wait for one upstream reply
    #[arg(long, env = "HAILO_PROXY_UPSTREAM_TIMEOUT", default_value_t = 300)]
    pub upstream_timeout: u64,

    /// Model advertised when the upstream lists none
    #[arg(long, env = "HAILO_PROXY_DEFAULT_MODEL", default_value = DEFAULT_MODEL)]
    pub default_model: String,

    /// Largest accepted request body, in bytes
    #[arg(long, env = "HAILO_PROXY_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Accepted Host header values (default: localhost and 127.0.0.1, with and without port)
    #[arg(long, env = "HAILO_PROXY_ALLOWED_HOSTS", value_delimiter = ',')]
    pub allowed_hosts: Vec<String>,

    /// Accepted Origin header values
    #[arg(long, env = "HAILO_PROXY_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Reject requests that carry no Origin header
    #[arg(long, env = "HAILO_PROXY_REQUIRE_ORIGIN")]
    pub require_origin: bool,

    /// Access-Control-Allow-Headers values (default: authorization, content-type, x-requested-with)
    #[arg(long, env = "HAILO_PROXY_CORS_ALLOWED_HEADERS", value_delimiter = ',')]
    pub cors_allowed_headers: Vec<String>,

    /// Access-Control-Max-Age for preflight responses, in seconds
    #[arg(long, env = "HAILO_PROXY_CORS_MAX_AGE", default_value_t = 600)]
    pub cors_max_age: u64,

    /// Write per-request trace artifacts
    #[arg(long, env = "HAILO_PROXY_TRACE")]
    pub trace: bool,

    /// Directory for trace artifacts (default: <tmp>/hailo-proxy-trace)
    #[arg(long, env = "HAILO_PROXY_TRACE_DIR")]
    pub trace_dir: Option<PathBuf>,

    /// Byte cap per trace artifact
    #[arg(long, env = "HAILO_PROXY_TRACE_MAX_BYTES", default_value_t = 65536)]
    pub trace_max_bytes: usize,

    /// Ceiling for max_tokens sent upstream
    #[arg(long, env = "HAILO_PROXY_MAX_TOKENS", default_value_t = 512)]
    pub max_tokens: u64,

    /// Number of trailing user messages forwarded
    #[arg(long, env = "HAILO_PROXY_MAX_HISTORY", default_value_t = 1)]
    pub max_history: usize,

    /// Number of tools listed in the system prompt
    #[arg(long, env = "HAILO_PROXY_MAX_TOOLS", default_value_t = 8)]
    pub max_tools: usize,

    /// Substrings of the user message that enable tool handling
    #[arg(
        long,
        env = "HAILO_PROXY_TOOL_INTENT_KEYWORDS",
        value_delimiter = ',',
        default_values_t = DEFAULT_INTENT_KEYWORDS.iter().map(|k| (*k).to_string())
    )]
    pub tool_intent_keywords: Vec<String>,

    /// Workspace skills directory (`<skill>/SKILL.md`)
    #[arg(long, env = "HAILO_PROXY_SKILLS_DIR")]
    pub skills_dir: Option<PathBuf>,

    /// Skills whose full SKILL.md is inlined on tool intent
    #[arg(long, env = "HAILO_PROXY_SKILL_DETAILS", value_delimiter = ',')]
    pub skill_details: Vec<String>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Cli {
    /// Address string for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the library configuration.
    pub fn into_config(self) -> ProxyConfig {
        let allowed_hosts = if self.allowed_hosts.is_empty() {
            default_allowed_hosts(self.port)
        } else {
            self.allowed_hosts
        };

        let mut security =
            SecurityPolicy::new(allowed_hosts, self.allowed_origins, !self.require_origin)
                .with_cors_allowed_headers(self.cors_allowed_headers);
        security.cors_max_age = self.cors_max_age;

        let defaults = TraceConfig::default();
        ProxyConfig {
            upstream_url: self.upstream.trim_end_matches('/').to_string(),
            upstream_timeout: Duration::from_secs(self.upstream_timeout),
            default_model: self.default_model,
            max_body_bytes: self.max_body_bytes,
            security,
            trace: TraceConfig {
                enabled: self.trace,
                dir: self.trace_dir.unwrap_or(defaults.dir),
                max_bytes: self.trace_max_bytes,
            },
            sanitizer: SanitizerConfig {
                max_tokens_ceiling: self.max_tokens,
                max_history_messages: self.max_history,
                max_tool_count: self.max_tools,
                intent_keywords: self.tool_intent_keywords,
                skills_dir: self.skills_dir,
                skill_detail_names: self.skill_details,
            },
        }
    }
}

fn default_allowed_hosts(port: u16) -> Vec<String> {
    ["localhost", "127.0.0.1"]
        .into_iter()
        .flat_map(|host| [host.to_string(), format!("{host}:{port}")])
        .collect()
}
