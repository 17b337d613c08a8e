// crates/sonar-mcp/src/config.rs
// ============================================================================
// Module: MCP Configuration (Re-export)
// Description: Re-export canonical Sonar MCP config types.
// Purpose: Preserve the server's public API while centralizing config logic.
// Dependencies: sonar-mcp-config
// ============================================================================

//! ## Overview
//! This module re-exports the canonical configuration model from
//! `sonar-mcp-config` so server callers need a single dependency.

/// Re-export canonical config types and helpers.
pub use sonar_mcp_config::*;
