//! Proxy error type and its HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::models::ErrorResponse;

/// Failures the proxy reports to the client itself.
///
/// Upstream HTTP errors are not represented here: those are relayed
/// verbatim by the forwarder.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The Security Gate rejected the request.
    #[error("{reason}: {value}")]
    Forbidden { reason: ForbiddenReason, value: String },

    /// The upstream did not answer within the configured timeout.
    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    /// The upstream could not be reached or its reply could not be read.
    #[error("Failed to reach upstream: {0}")]
    Upstream(String),

    /// Anything else that went wrong inside the proxy.
    #[error("Proxy error: {0}")]
    Internal(String),
}

/// Why the Security Gate refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    HostNotAllowed,
    OriginNotAllowed,
    OriginMissing,
}

impl ForbiddenReason {
    pub const fn code(self) -> &'static str {
        match self {
            Self::HostNotAllowed => "host_not_allowed",
            Self::OriginNotAllowed => "origin_not_allowed",
            Self::OriginMissing => "origin_missing",
        }
    }
}

impl std::fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::HostNotAllowed => "Host not allowed",
            Self::OriginNotAllowed => "Origin not allowed",
            Self::OriginMissing => "Origin header required",
        };
        f.write_str(text)
    }
}

impl ProxyError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) | Self::Internal(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Map a reqwest failure, separating timeouts from everything else.
    pub fn from_upstream(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout(err.to_string())
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

impl From<&ProxyError> for ErrorResponse {
    fn from(err: &ProxyError) -> Self {
        match err {
            ProxyError::Forbidden { reason, value } => {
                Self::with_code(reason.to_string(), "forbidden", reason.code()).with_param(value)
            }
            ProxyError::UpstreamTimeout(_) => {
                Self::with_code(err.to_string(), "server_error", "upstream_timeout")
            }
            ProxyError::Upstream(_) => {
                Self::with_code(err.to_string(), "server_error", "upstream_error")
            }
            ProxyError::Internal(_) => Self::with_code(err.to_string(), "server_error", "proxy_error"),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorResponse::from(&self))).into_response()
    }
}
