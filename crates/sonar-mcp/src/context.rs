// crates/sonar-mcp/src/context.rs
// ============================================================================
// Module: Transport Context
// Description: Per-request credential, organization, and tool overrides.
// Purpose: Carry caller identity from the transport layer into tool handlers.
// Dependencies: sonar-mcp-config
// ============================================================================

//! ## Overview
//! A [`TransportContext`] is built once per request (HTTP) or once per
//! session (stdio) and travels with every tool call. It holds the upstream
//! credential, an optional organization, and the per-request narrowing of the
//! globally enabled tool set.
//!
//! Credentials never appear in `Debug` output.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;

use sonar_mcp_config::ToolCategory;

// ============================================================================
// SECTION: Credential
// ============================================================================

/// Upstream API credential.
///
/// # Invariants
/// - The raw value is only reachable through [`Credential::as_str`].
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a raw credential value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw credential for upstream requests.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

// ============================================================================
// SECTION: Transport Context
// ============================================================================

/// Per-request (HTTP) or per-session (stdio) caller context.
#[derive(Debug, Clone)]
pub struct TransportContext {
    /// Upstream credential for this caller.
    pub credential: Credential,
    /// Organization key, when the upstream requires one.
    pub organization: Option<String>,
    /// Requested toolset narrowing; `None` keeps the global set.
    pub toolset_override: Option<BTreeSet<ToolCategory>>,
    /// Requested read-only narrowing; `None` keeps the global flag.
    pub read_only_override: Option<bool>,
}

impl TransportContext {
    /// Builds a caller context that follows the global tool settings.
    ///
    /// Stdio uses one for the whole session; HTTP builds one per request and
    /// layers header overrides on top with the `with_*` builders.
    #[must_use]
    pub const fn new(credential: Credential, organization: Option<String>) -> Self {
        Self {
            credential,
            organization,
            toolset_override: None,
            read_only_override: None,
        }
    }

    /// Returns a copy with the toolset override set.
    #[must_use]
    pub fn with_toolsets(mut self, toolsets: BTreeSet<ToolCategory>) -> Self {
        self.toolset_override = Some(toolsets);
        self
    }

    /// Returns a copy with the read-only override set.
    #[must_use]
    pub const fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only_override = Some(read_only);
        self
    }
}
