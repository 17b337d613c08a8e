// crates/sonar-mcp/src/audit.rs
// ============================================================================
// Module: Auth Audit Logging
// Description: Structured audit events for HTTP authentication decisions.
// Purpose: Record allow/deny decisions without exposing credentials.
// Dependencies: serde, tracing
// ============================================================================

//! ## Overview
//! Every decision taken by the authentication filter is reported to an
//! [`AuthAuditSink`]. Events never carry credential material; they carry the
//! decision, the HTTP status, and the organization and session facts that led
//! to it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Authentication decision outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthDecision {
    /// Request allowed through to dispatch.
    Allowed,
    /// Request rejected in the filter chain.
    Denied,
}

impl AuthDecision {
    /// Returns a stable label for the decision.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
        }
    }
}

/// Auth audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct AuthAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Decision taken.
    pub decision: AuthDecision,
    /// HTTP status returned for denials (200 for allowed requests).
    pub status: u16,
    /// Rejection reason.
    pub reason: Option<String>,
    /// Organization attached to the request context.
    pub organization: Option<String>,
    /// True when the request carried a session identifier.
    pub session: bool,
}

impl AuthAuditEvent {
    /// Builds an event for an allowed request.
    #[must_use]
    pub const fn allowed(organization: Option<String>, session: bool) -> Self {
        Self {
            event: "mcp_auth",
            decision: AuthDecision::Allowed,
            status: 200,
            reason: None,
            organization,
            session,
        }
    }

    /// Builds an event for a denied request.
    #[must_use]
    pub fn denied(status: u16, reason: impl Into<String>) -> Self {
        Self {
            event: "mcp_auth",
            decision: AuthDecision::Denied,
            status,
            reason: Some(reason.into()),
            organization: None,
            session: false,
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for authentication decisions.
pub trait AuthAuditSink: Send + Sync {
    /// Record an authentication decision.
    fn record(&self, event: &AuthAuditEvent);
}

/// Audit sink that emits `tracing` events.
pub struct TracingAuthAuditSink;

impl AuthAuditSink for TracingAuthAuditSink {
    fn record(&self, event: &AuthAuditEvent) {
        match event.decision {
            AuthDecision::Allowed => tracing::debug!(
                target: "sonar_mcp::audit",
                event = event.event,
                decision = event.decision.as_str(),
                organization = event.organization.as_deref(),
                session = event.session,
                "request authenticated"
            ),
            AuthDecision::Denied => tracing::warn!(
                target: "sonar_mcp::audit",
                event = event.event,
                decision = event.decision.as_str(),
                status = event.status,
                reason = event.reason.as_deref(),
                "request rejected"
            ),
        }
    }
}

/// No-op audit sink.
pub struct NoopAuthAuditSink;

impl AuthAuditSink for NoopAuthAuditSink {
    fn record(&self, _event: &AuthAuditEvent) {}
}
