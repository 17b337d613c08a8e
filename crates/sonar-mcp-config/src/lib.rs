// crates/sonar-mcp-config/src/lib.rs
// ============================================================================
// Module: Sonar MCP Config Library
// Description: Canonical config model, environment overrides, and validation.
// Purpose: Single source of truth for sonar-mcp.toml and SONARQUBE_* semantics.
// Dependencies: serde, toml, url
// ============================================================================

//! ## Overview
//! `sonar-mcp-config` defines the canonical configuration model for the Sonar
//! MCP server. Configuration is read from an optional TOML file, overlaid with
//! `SONARQUBE_*` environment variables, and validated fail-closed before any
//! transport is built.
//!
//! Security posture: config inputs are untrusted; invalid auth modes, ports,
//! and toolset keys are startup errors rather than request-time surprises.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod category;
pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use category::ToolCategory;
pub use config::*;
