// crates/sonar-mcp-config/src/category.rs
// ============================================================================
// Module: Tool Categories
// Description: Closed set of tool category tags used for toolset filtering.
// Purpose: Parse and label categories consistently across config and headers.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every tool belongs to exactly one [`ToolCategory`]. Categories are the unit
//! of bulk enable/disable via the `toolsets` setting and the per-request
//! toolset header. Keys are parsed case-insensitively.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::config::ConfigError;

// ============================================================================
// SECTION: Tool Category
// ============================================================================

/// Tool category tag.
///
/// # Invariants
/// - Keys returned by [`ToolCategory::key`] are stable and lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ToolCategory {
    /// Code analysis tools.
    Analysis,
    /// Issue search and transitions.
    Issues,
    /// Project discovery. Always enabled.
    Projects,
    /// Quality gate status and listing.
    QualityGates,
    /// Rule lookup.
    Rules,
    /// Source and SCM access.
    Sources,
    /// Component measures.
    Measures,
    /// Supported languages.
    Languages,
    /// Portfolio views.
    Portfolios,
    /// Server health and status.
    System,
    /// Webhook management.
    Webhooks,
    /// Dependency risk reports.
    DependencyRisks,
    /// Tools provided by external integrations.
    External,
}

impl ToolCategory {
    /// All categories in declaration order.
    pub const ALL: [Self; 13] = [
        Self::Analysis,
        Self::Issues,
        Self::Projects,
        Self::QualityGates,
        Self::Rules,
        Self::Sources,
        Self::Measures,
        Self::Languages,
        Self::Portfolios,
        Self::System,
        Self::Webhooks,
        Self::DependencyRisks,
        Self::External,
    ];

    /// Returns the stable configuration key for the category.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Issues => "issues",
            Self::Projects => "projects",
            Self::QualityGates => "quality-gates",
            Self::Rules => "rules",
            Self::Sources => "sources",
            Self::Measures => "measures",
            Self::Languages => "languages",
            Self::Portfolios => "portfolios",
            Self::System => "system",
            Self::Webhooks => "webhooks",
            Self::DependencyRisks => "dependency-risks",
            Self::External => "external",
        }
    }

    /// Parses a comma-separated category list, ignoring blank entries.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when any entry is not a known category key.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, ConfigError> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for ToolCategory {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|category| category.key() == normalized)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown toolset: {value}")))
    }
}

impl TryFrom<String> for ToolCategory {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ToolCategory> for String {
    fn from(value: ToolCategory) -> Self {
        value.key().to_string()
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
