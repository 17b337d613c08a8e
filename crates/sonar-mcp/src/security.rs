// crates/sonar-mcp/src/security.rs
// ============================================================================
// Module: Origin Security Filter
// Description: Origin validation and CORS handling for the HTTP transport.
// Purpose: Block cross-site and DNS-rebinding requests to loopback servers.
// Dependencies: axum, url
// ============================================================================

//! ## Overview
//! The [`SecurityFilter`] runs before authentication on every HTTP request.
//! Preflight requests are answered directly. A server bound to a loopback
//! address only accepts browser origins whose host is exactly a loopback
//! name; a server bound elsewhere accepts every origin and answers with a
//! wildcard.
//!
//! Security posture: the `Origin` header is attacker controlled; hosts are
//! compared after URL parsing, never by prefix or substring.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::ACCESS_CONTROL_ALLOW_HEADERS;
use axum::http::header::ACCESS_CONTROL_ALLOW_METHODS;
use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::http::header::ACCESS_CONTROL_MAX_AGE;
use axum::http::header::ORIGIN;
use axum::response::IntoResponse;
use axum::response::Response;
use url::Host;
use url::Url;

use crate::rpc::error_body;
use crate::rpc::error_codes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Methods advertised in preflight responses.
const ALLOWED_METHODS: &str = "POST, OPTIONS";
/// Request headers advertised in preflight responses.
const ALLOWED_HEADERS: &str = "Content-Type, Authorization, SONARQUBE_TOKEN, SONARQUBE_ORG, \
                               SONARQUBE_TOOLSETS, SONARQUBE_READ_ONLY, MCP-Protocol-Version, \
                               Mcp-Session-Id";
/// Preflight cache lifetime in seconds.
const PREFLIGHT_MAX_AGE: &str = "600";
/// Rejection message for disallowed origins.
pub const ORIGIN_REJECTED_MESSAGE: &str = "Origin not allowed";

// ============================================================================
// SECTION: Decisions
// ============================================================================

/// Outcome of evaluating a request origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginDecision {
    /// No `Origin` header on a loopback bind; no CORS header is emitted.
    SameOrigin,
    /// Origin accepted; the value is echoed as `Access-Control-Allow-Origin`.
    Allowed(HeaderValue),
    /// Origin rejected with 403.
    Rejected,
}

impl OriginDecision {
    /// Returns the allow-origin header value to attach, if any.
    #[must_use]
    pub fn allow_origin(&self) -> Option<&HeaderValue> {
        match self {
            Self::Allowed(value) => Some(value),
            Self::SameOrigin | Self::Rejected => None,
        }
    }
}

// ============================================================================
// SECTION: Security Filter
// ============================================================================

/// Origin/CORS policy derived from the configured bind address.
#[derive(Debug, Clone, Copy)]
pub struct SecurityFilter {
    /// True when the listener only accepts loopback connections.
    loopback_only: bool,
}

impl SecurityFilter {
    /// Builds the filter for a bind host.
    #[must_use]
    pub fn for_bind_host(host: &str) -> Self {
        Self {
            loopback_only: sonar_mcp_config::is_loopback_host(host),
        }
    }

    /// Returns true when only loopback origins are accepted.
    #[must_use]
    pub const fn is_loopback_only(&self) -> bool {
        self.loopback_only
    }

    /// Evaluates the `Origin` header of a non-preflight request.
    #[must_use]
    pub fn evaluate(&self, headers: &HeaderMap) -> OriginDecision {
        if !self.loopback_only {
            return OriginDecision::Allowed(HeaderValue::from_static("*"));
        }
        let Some(origin) = headers.get(ORIGIN) else {
            return OriginDecision::SameOrigin;
        };
        match origin.to_str() {
            Ok(raw) if is_loopback_origin(raw) => OriginDecision::Allowed(origin.clone()),
            _ => OriginDecision::Rejected,
        }
    }

    /// Answers a CORS preflight request without touching downstream logic.
    #[must_use]
    pub fn preflight_response(&self, headers: &HeaderMap) -> Response {
        let mut response = StatusCode::OK.into_response();
        let response_headers = response.headers_mut();
        if let Some(value) = self.evaluate(headers).allow_origin() {
            response_headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value.clone());
        }
        response_headers
            .insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
        response_headers
            .insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
        response_headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(PREFLIGHT_MAX_AGE));
        response
    }
}

/// Builds the 403 response for a rejected origin.
#[must_use]
pub fn origin_rejected_response() -> Response {
    let body = error_body(error_codes::SERVER_ERROR, ORIGIN_REJECTED_MESSAGE);
    (StatusCode::FORBIDDEN, Json(body)).into_response()
}

/// Returns true when the origin's host is exactly a loopback name.
fn is_loopback_origin(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw.trim()) else {
        return false;
    };
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(addr)) => addr == std::net::Ipv4Addr::LOCALHOST,
        Some(Host::Ipv6(addr)) => addr == std::net::Ipv6Addr::LOCALHOST,
        None => false,
    }
}
