//! Host/Origin validation and CORS.
//!
//! Runs before any handler and before the body is read, so a rejected
//! request never reaches the upstream. Guards the proxy against DNS
//! rebinding and cross-site requests from arbitrary browser pages.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::config::SecurityPolicy;
use crate::error::{ForbiddenReason, ProxyError};
use crate::trace::TraceId;

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";

/// Middleware: reject disallowed Host/Origin, answer preflight, add CORS headers.
pub async fn security_gate(policy: Arc<SecurityPolicy>, req: Request, next: Next) -> Response {
    let host = request_host(&req);
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let allowed_origin = match check(&policy, &host, origin.as_deref()) {
        Ok(allowed_origin) => allowed_origin,
        Err(err) => {
            let trace_id = req.extensions().get::<TraceId>();
            warn!(
                trace_id = trace_id.map_or("-", TraceId::as_str),
                method = %req.method(),
                path = %req.uri().path(),
                host = %host,
                origin = origin.as_deref().unwrap_or(""),
                "Rejected request: {err}"
            );
            return err.into_response();
        }
    };

    let mut response = if req.method() == Method::OPTIONS {
        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::NO_CONTENT.into_response())
    } else {
        next.run(req).await
    };

    if let Some(origin) = allowed_origin {
        apply_cors_headers(response.headers_mut(), &policy, origin);
    }
    response
}

/// Validate a Host/Origin pair.
///
/// Returns the origin to echo in CORS headers, if the request carried one.
pub fn check<'a>(
    policy: &SecurityPolicy,
    host: &str,
    origin: Option<&'a str>,
) -> Result<Option<&'a str>, ProxyError> {
    if !policy.host_allowed(host) {
        return Err(ProxyError::Forbidden {
            reason: ForbiddenReason::HostNotAllowed,
            value: host.to_string(),
        });
    }

    match origin.map(str::trim).filter(|o| !o.is_empty()) {
        Some(origin) if policy.origin_allowed(origin) => Ok(Some(origin)),
        Some(origin) => Err(ProxyError::Forbidden {
            reason: ForbiddenReason::OriginNotAllowed,
            value: origin.to_string(),
        }),
        None if policy.allow_missing_origin => Ok(None),
        None => Err(ProxyError::Forbidden {
            reason: ForbiddenReason::OriginMissing,
            value: String::new(),
        }),
    }
}

/// `Host` header, falling back to the URI authority (HTTP/2).
fn request_host(req: &Request) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(ToString::to_string))
        .unwrap_or_default()
}

fn apply_cors_headers(headers: &mut HeaderMap, policy: &SecurityPolicy, origin: &str) {
    let Ok(origin) = HeaderValue::from_str(origin) else {
        return;
    };
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    if let Ok(value) = HeaderValue::from_str(&policy.cors_allowed_headers.join(", ")) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, value);
    }
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(policy.cors_max_age));
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
}
