// crates/sonar-mcp/src/telemetry.rs
// ============================================================================
// Module: Tool Telemetry
// Description: Observability hooks for tool invocations.
// Purpose: Emit one completion event per tool call without hard deps.
// Dependencies: thiserror, tracing
// ============================================================================

//! ## Overview
//! The executor reports every tool call to a [`TelemetrySink`]. Sinks may
//! fail; the executor logs the failure and carries on, so telemetry can never
//! change a tool result.
//!
//! Security posture: events carry the tool key, outcome, and latency only,
//! never arguments or credentials.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Namespace prefix for tool keys.
pub const TOOL_KEY_NAMESPACE: &str = "sonar_mcp";

/// Default latency buckets in milliseconds for tool histograms.
pub const TOOL_LATENCY_BUCKETS_MS: &[u64] =
    &[1, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000];

// ============================================================================
// SECTION: Events
// ============================================================================

/// Tool completion event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvokedEvent {
    /// Namespaced tool key (`sonar_mcp/<name>`).
    pub tool_key: String,
    /// True when the tool returned a success result.
    pub success: bool,
    /// Wall-clock duration of the call.
    pub latency: Duration,
}

impl ToolInvokedEvent {
    /// Builds an event for a tool name.
    #[must_use]
    pub fn new(tool_name: &str, success: bool, latency: Duration) -> Self {
        Self {
            tool_key: format!("{TOOL_KEY_NAMESPACE}/{tool_name}"),
            success,
            latency,
        }
    }

    /// Returns the smallest histogram bucket holding the latency.
    #[must_use]
    pub fn latency_bucket_ms(&self) -> Option<u64> {
        let millis = u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX);
        TOOL_LATENCY_BUCKETS_MS.iter().copied().find(|bucket| millis <= *bucket)
    }
}

/// Telemetry emission failure.
#[derive(Debug, Error)]
#[error("telemetry emission failed: {0}")]
pub struct TelemetryError(pub String);

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Telemetry sink for tool invocations.
pub trait TelemetrySink: Send + Sync {
    /// Records a tool completion event.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError`] when the event cannot be delivered.
    fn tool_invoked(&self, event: &ToolInvokedEvent) -> Result<(), TelemetryError>;
}

/// No-op telemetry sink.
///
/// # Invariants
/// - Events are intentionally discarded.
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn tool_invoked(&self, _event: &ToolInvokedEvent) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Telemetry sink that emits `tracing` events.
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn tool_invoked(&self, event: &ToolInvokedEvent) -> Result<(), TelemetryError> {
        tracing::info!(
            target: "sonar_mcp::telemetry",
            tool = %event.tool_key,
            success = event.success,
            latency_ms = u64::try_from(event.latency.as_millis()).unwrap_or(u64::MAX),
            bucket_ms = event.latency_bucket_ms(),
            "tool invoked"
        );
        Ok(())
    }
}
