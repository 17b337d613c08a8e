// crates/sonar-mcp/src/auth.rs
// ============================================================================
// Module: HTTP Authentication Filter
// Description: Per-request credential, organization, and session checks.
// Purpose: Build a trusted TransportContext or reject before dispatch.
// Dependencies: axum, sonar-mcp-config
// ============================================================================

//! ## Overview
//! The [`AuthenticationFilter`] runs after the origin filter on every HTTP
//! request. It extracts the upstream credential, enforces the organization
//! policy of multi-tenant deployments, parses per-request tool filter
//! overrides, and binds client session identifiers to their credential. All
//! rejections are fail-closed and short-circuit before the tool registry.
//!
//! Security posture: every header read here is untrusted input.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::Json;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::header::WWW_AUTHENTICATE;
use axum::response::IntoResponse;
use axum::response::Response;
use sonar_mcp_config::AuthMode;
use sonar_mcp_config::ToolCategory;
use sonar_mcp_config::UpstreamConfig;

use crate::audit::AuthAuditEvent;
use crate::audit::AuthAuditSink;
use crate::context::Credential;
use crate::context::TransportContext;
use crate::rpc::error_body;
use crate::rpc::error_codes;
use crate::session::SessionTokenStore;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Request header names consumed by the HTTP transport.
pub mod header_names {
    /// Upstream credential.
    pub const TOKEN: &str = "sonarqube_token";
    /// Upstream organization key.
    pub const ORGANIZATION: &str = "sonarqube_org";
    /// Per-request toolset override (comma-separated category keys).
    pub const TOOLSETS: &str = "sonarqube_toolsets";
    /// Per-request read-only override.
    pub const READ_ONLY: &str = "sonarqube_read_only";
    /// Negotiated MCP protocol version.
    pub const PROTOCOL_VERSION: &str = "mcp-protocol-version";
    /// Client session identifier.
    pub const SESSION_ID: &str = "mcp-session-id";
}

/// Maximum accepted size of a credential-bearing header.
const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;
/// Maximum accepted session identifier length.
const MAX_SESSION_ID_BYTES: usize = 256;
/// Challenge returned with 401 responses.
const BEARER_CHALLENGE: &str = "Bearer realm=\"MCP Server\"";

// ============================================================================
// SECTION: Organization Policy
// ============================================================================

/// Organization requirements for incoming requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizationPolicy {
    /// Single-tenant upstream; organization headers are ignored.
    NotApplicable,
    /// Multi-tenant upstream with a server-wide organization.
    Static(String),
    /// Multi-tenant upstream; each request names its organization.
    PerRequest,
}

impl OrganizationPolicy {
    /// Derives the policy from upstream configuration.
    #[must_use]
    pub fn from_upstream(upstream: &UpstreamConfig) -> Self {
        if !upstream.is_cloud() {
            return Self::NotApplicable;
        }
        upstream
            .organization
            .as_ref()
            .map_or(Self::PerRequest, |organization| Self::Static(organization.clone()))
    }

    /// Resolves the organization for one request.
    fn resolve(&self, headers: &HeaderMap) -> Result<Option<String>, AuthRejection> {
        let requested = header_str(headers, header_names::ORGANIZATION)?
            .map(str::trim)
            .filter(|value| !value.is_empty());
        match self {
            Self::NotApplicable => Ok(None),
            Self::Static(configured) => match requested {
                Some(value) if value != configured.as_str() => Err(AuthRejection::bad_request(format!(
                    "Organization header does not match the configured organization \
                     '{configured}'"
                ))),
                _ => Ok(Some(configured.clone())),
            },
            Self::PerRequest => requested.map(|value| Some(value.to_string())).ok_or_else(|| {
                AuthRejection::bad_request(
                    "SONARQUBE_ORG organization header is required".to_string(),
                )
            }),
        }
    }
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Successful filter outcome.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// CORS preflight; answered without a context.
    Preflight,
    /// Authenticated request with its per-request context.
    Authenticated(TransportContext),
}

/// Filter rejection rendered as a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRejection {
    /// HTTP status.
    pub status: StatusCode,
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// True when a bearer challenge header is attached.
    pub challenge: bool,
}

impl AuthRejection {
    /// Builds a 401 rejection with a bearer challenge.
    fn unauthorized(message: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: error_codes::SERVER_ERROR,
            message: message.to_string(),
            challenge: true,
        }
    }

    /// Builds a 400 rejection for malformed request metadata.
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: error_codes::SERVER_ERROR,
            message,
            challenge: false,
        }
    }

    /// Builds a 403 rejection.
    fn forbidden(message: &str) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: error_codes::SERVER_ERROR,
            message: message.to_string(),
            challenge: false,
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = error_body(self.code, &self.message);
        let mut response = (self.status, Json(body)).into_response();
        if self.challenge {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static(BEARER_CHALLENGE));
        }
        response
    }
}

// ============================================================================
// SECTION: Authentication Filter
// ============================================================================

/// Per-request authentication for the HTTP transport.
pub struct AuthenticationFilter {
    /// Configured inbound auth mode.
    mode: AuthMode,
    /// Organization requirements.
    organization: OrganizationPolicy,
    /// Session bindings shared with the server lifecycle.
    sessions: Arc<SessionTokenStore>,
    /// Decision audit sink.
    audit: Arc<dyn AuthAuditSink>,
}

impl AuthenticationFilter {
    /// Creates a filter.
    #[must_use]
    pub fn new(
        mode: AuthMode,
        organization: OrganizationPolicy,
        sessions: Arc<SessionTokenStore>,
        audit: Arc<dyn AuthAuditSink>,
    ) -> Self {
        Self {
            mode,
            organization,
            sessions,
            audit,
        }
    }

    /// Authenticates one request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthRejection`] when the request must not reach dispatch.
    pub fn authenticate(
        &self,
        method: &Method,
        headers: &HeaderMap,
    ) -> Result<AuthOutcome, AuthRejection> {
        if *method == Method::OPTIONS {
            return Ok(AuthOutcome::Preflight);
        }
        match self.build_context(headers) {
            Ok(context) => {
                let session = headers.contains_key(header_names::SESSION_ID);
                self.audit.record(&AuthAuditEvent::allowed(context.organization.clone(), session));
                Ok(AuthOutcome::Authenticated(context))
            }
            Err(rejection) => {
                self.audit.record(&AuthAuditEvent::denied(
                    rejection.status.as_u16(),
                    rejection.message.clone(),
                ));
                Err(rejection)
            }
        }
    }

    /// Runs the credential, organization, override, and session checks.
    fn build_context(&self, headers: &HeaderMap) -> Result<TransportContext, AuthRejection> {
        if self.mode == AuthMode::Oauth {
            return Err(AuthRejection::unauthorized("OAuth authentication not yet implemented"));
        }
        let credential = extract_credential(headers)?;
        let organization = self.organization.resolve(headers)?;
        let mut context = TransportContext::new(credential, organization);
        if let Some(raw) = header_str(headers, header_names::TOOLSETS)? {
            let toolsets = ToolCategory::parse_list(raw).map_err(|err| {
                AuthRejection::bad_request(format!("invalid SONARQUBE_TOOLSETS header: {err}"))
            })?;
            context = context.with_toolsets(toolsets.into_iter().collect());
        }
        if let Some(raw) = header_str(headers, header_names::READ_ONLY)? {
            context = context.with_read_only(parse_flag(raw)?);
        }
        if let Some(session_id) = header_str(headers, header_names::SESSION_ID)? {
            self.bind_session(session_id, &context.credential)?;
        }
        Ok(context)
    }

    /// Binds or verifies the client session identifier.
    fn bind_session(&self, session_id: &str, credential: &Credential) -> Result<(), AuthRejection> {
        let session_id = session_id.trim();
        if session_id.is_empty() || session_id.len() > MAX_SESSION_ID_BYTES {
            return Err(AuthRejection::bad_request("invalid Mcp-Session-Id header".to_string()));
        }
        if self.sessions.bind(session_id, credential) {
            Ok(())
        } else {
            Err(AuthRejection::forbidden("Session credential mismatch"))
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads a header as UTF-8 text.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AuthRejection> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| AuthRejection::bad_request(format!("{name} header must be utf-8")))
        })
        .transpose()
}

/// Extracts the upstream credential from the token or authorization header.
fn extract_credential(headers: &HeaderMap) -> Result<Credential, AuthRejection> {
    let missing = || AuthRejection::unauthorized("SonarQube token required");
    if let Some(value) = headers.get(header_names::TOKEN) {
        if value.len() > MAX_AUTH_HEADER_BYTES {
            return Err(AuthRejection::unauthorized("token header too large"));
        }
        let token = value.to_str().map_err(|_| missing())?.trim();
        if !token.is_empty() {
            return Ok(Credential::new(token));
        }
    }
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Err(missing());
    };
    if value.len() > MAX_AUTH_HEADER_BYTES {
        return Err(AuthRejection::unauthorized("authorization header too large"));
    }
    let header = value.to_str().map_err(|_| missing())?;
    parse_bearer_token(header).map(Credential::new).ok_or_else(missing)
}

/// Parses a `Bearer <token>` authorization value.
fn parse_bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Parses the read-only override header.
fn parse_flag(raw: &str) -> Result<bool, AuthRejection> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(AuthRejection::bad_request(
            "SONARQUBE_READ_ONLY header must be true or false".to_string(),
        )),
    }
}
