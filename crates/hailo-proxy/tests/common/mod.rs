//! Shared helpers for hailo-proxy router tests.

pub mod upstream;

use std::path::Path;

use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use serde_json::Value;

use hailo_proxy::{ProxyConfig, SecurityPolicy, TraceConfig};

/// Host the test policy accepts.
pub const TEST_HOST: &str = "localhost:8081";

/// Origin the test policy accepts.
pub const TEST_ORIGIN: &str = "http://localhost:3000";

/// Proxy config pointing at `upstream_url`, tracing into `trace_dir`.
pub fn test_config(upstream_url: &str, trace_dir: &Path) -> ProxyConfig {
    ProxyConfig {
        upstream_url: upstream_url.to_string(),
        security: SecurityPolicy::new([TEST_HOST], [TEST_ORIGIN], true),
        trace: TraceConfig {
            enabled: true,
            dir: trace_dir.to_path_buf(),
            max_bytes: 64 * 1024,
        },
        ..ProxyConfig::default()
    }
}

/// Request builder with the allowed Host already set.
pub fn request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", TEST_HOST)
}

/// JSON POST with the allowed Host.
pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    request("POST", uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Trace artifact names in `dir`, sorted.
// Allow unused: not every test binary inspects traces
#[allow(dead_code)]
pub fn trace_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
