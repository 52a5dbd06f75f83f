//! The upstream round trip.
//!
//! One request per client request, bounded by the configured timeout, no
//! retries. Replies are fully buffered: every chat response is rewritten
//! before it reaches the client, and the upstream never streams anyway.

use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, error};

use crate::error::ProxyError;

/// Headers that are never forwarded upstream.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
    // Preflight-only; the gate answers those itself
    "access-control-request-method",
    "access-control-request-headers",
];

/// Upstream reply headers dropped before relaying.
const RELAY_STRIPPED_HEADERS: &[&str] = &["transfer-encoding", "connection", "content-length"];

/// Check if a header should be forwarded.
pub fn should_forward_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !HOP_BY_HOP_HEADERS.contains(&lower.as_str())
}

/// A fully read upstream reply.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamReply {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Send one request upstream and read the whole reply.
///
/// Any HTTP status is an `Ok`; only transport failures and timeouts are
/// errors.
pub async fn forward(
    client: &Client,
    method: Method,
    url: &str,
    headers: &HeaderMap,
    body: Bytes,
    timeout: Duration,
) -> Result<UpstreamReply, ProxyError> {
    debug!(%method, url, bytes = body.len(), "Forwarding upstream");

    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if should_forward_header(name.as_str()) {
            forwarded.append(name.clone(), value.clone());
        }
    }

    let mut request = client
        .request(method, url)
        .headers(forwarded)
        .timeout(timeout);
    if !body.is_empty() {
        request = request.body(body);
    }

    let response = request.send().await.map_err(|e| {
        error!("Failed to reach upstream: {e}");
        ProxyError::from_upstream(&e)
    })?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(|e| {
        error!("Failed to read upstream response: {e}");
        ProxyError::from_upstream(&e)
    })?;

    Ok(UpstreamReply {
        status,
        headers,
        body,
    })
}

/// Relay an upstream reply unchanged apart from framing headers.
pub fn relay(reply: UpstreamReply) -> Response {
    with_body(reply.status, &reply.headers, reply.body)
}

/// Build a response from upstream status and headers around a new body.
pub fn with_body(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Response {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        if !RELAY_STRIPPED_HEADERS.contains(&name.as_str()) {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
