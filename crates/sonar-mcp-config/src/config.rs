// crates/sonar-mcp-config/src/config.rs
// ============================================================================
// Module: Sonar MCP Configuration
// Description: Configuration loading, environment overrides, and validation.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from an optional TOML file with strict size and
//! path limits, then overlaid with `SONARQUBE_*` environment variables.
//! Invalid configuration fails closed: an unknown auth mode, a privileged
//! port, or an unknown toolset key aborts startup.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::category::ToolCategory;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "sonar-mcp.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "SONAR_MCP_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum length of an upstream token.
pub(crate) const MAX_TOKEN_LENGTH: usize = 512;
/// Lowest non-privileged TCP port.
pub const MIN_HTTP_PORT: u32 = 1024;
/// Highest valid TCP port.
pub const MAX_HTTP_PORT: u32 = 65_535;
/// Default HTTP port.
pub(crate) const DEFAULT_HTTP_PORT: u32 = 8080;
/// Default HTTP bind host.
pub(crate) const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
/// Default upstream server URL.
pub(crate) const DEFAULT_UPSTREAM_URL: &str = "https://sonarcloud.io";
/// Host suffix identifying the multi-tenant cloud offering.
const CLOUD_HOST: &str = "sonarcloud.io";
/// Default maximum request body size in bytes.
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Default upstream request timeout in milliseconds.
pub(crate) const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 30_000;
/// Default stdio close grace period in milliseconds.
pub(crate) const DEFAULT_STDIO_CLOSE_GRACE_MS: u64 = 10_000;
/// Default wait for background initialization during shutdown.
pub(crate) const DEFAULT_INIT_SHUTDOWN_WAIT_MS: u64 = 30_000;

/// Environment variable names consumed by [`SonarMcpConfig::apply_env`].
pub mod env_keys {
    /// Transport selection (`stdio`, `http`, `https`).
    pub const TRANSPORT: &str = "SONARQUBE_TRANSPORT";
    /// HTTP bind host.
    pub const HTTP_HOST: &str = "SONARQUBE_HTTP_HOST";
    /// HTTP bind port.
    pub const HTTP_PORT: &str = "SONARQUBE_HTTP_PORT";
    /// HTTP auth mode (`token`, `oauth`).
    pub const HTTP_AUTH_MODE: &str = "SONARQUBE_HTTP_AUTH_MODE";
    /// TLS certificate chain path (PEM).
    pub const TLS_CERT_PATH: &str = "SONARQUBE_TLS_CERT_PATH";
    /// TLS private key path (PEM).
    pub const TLS_KEY_PATH: &str = "SONARQUBE_TLS_KEY_PATH";
    /// Comma-separated enabled toolsets.
    pub const TOOLSETS: &str = "SONARQUBE_TOOLSETS";
    /// Read-only mode flag.
    pub const READ_ONLY: &str = "SONARQUBE_READ_ONLY";
    /// Upstream server URL.
    pub const URL: &str = "SONARQUBE_URL";
    /// Upstream credential.
    pub const TOKEN: &str = "SONARQUBE_TOKEN";
    /// Upstream organization key.
    pub const ORG: &str = "SONARQUBE_ORG";
}

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Sonar MCP server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SonarMcpConfig {
    /// Server transport configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Tool enablement configuration.
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Upstream API configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Embedded analysis backend configuration.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Startup and shutdown timing configuration.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl SonarMcpConfig {
    /// Loads configuration from disk and the process environment.
    ///
    /// An explicit path must exist. Without one, `SONAR_MCP_CONFIG` is
    /// consulted, then `sonar-mcp.toml` in the working directory; when neither
    /// is present the defaults are used.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match resolve_path(path)? {
            Some(resolved) => Self::from_file(&resolved)?,
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML file without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        validate_path(path)?;
        let bytes = fs::read(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Overlays environment variables onto the configuration.
    ///
    /// `lookup` returns the raw value for a variable name. Blank values are
    /// treated as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable holds an unparseable value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(value) = read(env_keys::TRANSPORT) {
            self.server.transport = value.parse()?;
        }
        if let Some(value) = read(env_keys::HTTP_HOST) {
            self.server.http.host = value.trim().to_string();
        }
        if let Some(value) = read(env_keys::HTTP_PORT) {
            self.server.http.port = value.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} must be a port number", env_keys::HTTP_PORT))
            })?;
        }
        if let Some(value) = read(env_keys::HTTP_AUTH_MODE) {
            self.server.http.auth_mode = value.parse()?;
        }
        match (read(env_keys::TLS_CERT_PATH), read(env_keys::TLS_KEY_PATH)) {
            (Some(cert_path), Some(key_path)) => {
                self.server.http.tls = Some(ServerTlsConfig {
                    cert_path,
                    key_path,
                });
            }
            (None, None) => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "{} and {} must be set together",
                    env_keys::TLS_CERT_PATH,
                    env_keys::TLS_KEY_PATH
                )));
            }
        }
        if let Some(value) = read(env_keys::TOOLSETS) {
            self.tools.toolsets = Some(ToolCategory::parse_list(&value)?);
        }
        if let Some(value) = read(env_keys::READ_ONLY) {
            self.tools.read_only = parse_bool(env_keys::READ_ONLY, &value)?;
        }
        if let Some(value) = read(env_keys::URL) {
            self.upstream.url = value.trim().to_string();
        }
        if let Some(value) = read(env_keys::TOKEN) {
            self.upstream.token = Some(value);
        }
        if let Some(value) = read(env_keys::ORG) {
            self.upstream.organization = Some(value.trim().to_string());
        }
        Ok(())
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.upstream.validate(self.server.transport)?;
        self.backend.validate()?;
        self.lifecycle.validate()?;
        Ok(())
    }
}

/// Server configuration for MCP transports.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Transport type for MCP.
    #[serde(default)]
    pub transport: ServerTransport,
    /// HTTP listener configuration (ignored for stdio).
    #[serde(default)]
    pub http: HttpConfig,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: ServerTransport::Stdio,
            http: HttpConfig::default(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    /// Validates server transport configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_body_bytes must be greater than zero".to_string(),
            ));
        }
        match self.transport {
            ServerTransport::Stdio => Ok(()),
            ServerTransport::Http => {
                if self.http.tls.is_some() {
                    return Err(ConfigError::Invalid(
                        "tls settings require the https transport".to_string(),
                    ));
                }
                self.http.validate()
            }
            ServerTransport::Https => {
                if self.http.tls.is_none() {
                    return Err(ConfigError::Invalid(
                        "https transport requires tls cert_path and key_path".to_string(),
                    ));
                }
                self.http.validate()
            }
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind host (IP literal or `localhost`).
    #[serde(default = "default_http_host")]
    pub host: String,
    /// Bind port; kept wide so out-of-range values reach validation.
    #[serde(default = "default_http_port")]
    pub port: u32,
    /// Inbound authentication mode.
    #[serde(default)]
    pub auth_mode: AuthMode,
    /// TLS material for the https transport.
    #[serde(default)]
    pub tls: Option<ServerTlsConfig>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
            auth_mode: AuthMode::Token,
            tls: None,
        }
    }
}

impl HttpConfig {
    /// Validates the HTTP listener configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("http host must be non-empty".to_string()));
        }
        validate_port(self.port)?;
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        Ok(())
    }
}

/// TLS configuration for the https transport.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerTlsConfig {
    /// Server certificate chain (PEM).
    pub cert_path: String,
    /// Server private key (PEM).
    pub key_path: String,
}

impl ServerTlsConfig {
    /// Validates TLS configuration paths.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("tls.cert_path", &self.cert_path)?;
        validate_path_string("tls.key_path", &self.key_path)
    }
}

/// Supported MCP transport types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerTransport {
    /// Use stdin/stdout transport.
    #[default]
    Stdio,
    /// Use plain HTTP JSON-RPC transport.
    Http,
    /// Use TLS-terminated HTTP JSON-RPC transport.
    Https,
}

impl ServerTransport {
    /// Returns a stable label for the transport.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl FromStr for ServerTransport {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(ConfigError::Invalid(format!("unknown transport: {other}"))),
        }
    }
}

/// Inbound HTTP authentication modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(try_from = "String")]
pub enum AuthMode {
    /// Credential supplied per request in a header.
    #[default]
    Token,
    /// OAuth bearer flow (not yet implemented; every request is rejected).
    Oauth,
}

impl AuthMode {
    /// Returns a stable label for the auth mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Oauth => "oauth",
        }
    }
}

impl FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "token" => Ok(Self::Token),
            "oauth" => Ok(Self::Oauth),
            _ => Err(ConfigError::Invalid(format!(
                "invalid auth mode: {value} (expected token or oauth)"
            ))),
        }
    }
}

impl TryFrom<String> for AuthMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool enablement configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    /// Enabled toolsets; `None` enables every category.
    #[serde(default)]
    pub toolsets: Option<Vec<ToolCategory>>,
    /// Expose only tools marked read-only.
    #[serde(default)]
    pub read_only: bool,
}

impl ToolsConfig {
    /// Returns the configured category set, or `None` when all are enabled.
    #[must_use]
    pub fn category_set(&self) -> Option<BTreeSet<ToolCategory>> {
        self.toolsets.as_ref().map(|toolsets| toolsets.iter().copied().collect())
    }
}

/// Upstream API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream server.
    #[serde(default = "default_upstream_url")]
    pub url: String,
    /// Credential used for stdio sessions.
    #[serde(default)]
    pub token: Option<String>,
    /// Statically configured organization (cloud only).
    #[serde(default)]
    pub organization: Option<String>,
    /// Upstream request timeout in milliseconds.
    #[serde(default = "default_upstream_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            token: None,
            organization: None,
            request_timeout_ms: default_upstream_timeout_ms(),
        }
    }
}

impl UpstreamConfig {
    /// Validates upstream configuration against the selected transport.
    fn validate(&self, transport: ServerTransport) -> Result<(), ConfigError> {
        let url = Url::parse(self.url.trim())
            .map_err(|_| ConfigError::Invalid("upstream.url must be a valid url".to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(
                "upstream.url must use http:// or https://".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "upstream.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(token) = &self.token {
            if token.trim().is_empty() {
                return Err(ConfigError::Invalid("upstream.token must be non-empty".to_string()));
            }
            if token.len() > MAX_TOKEN_LENGTH {
                return Err(ConfigError::Invalid("upstream.token too long".to_string()));
            }
        }
        if let Some(organization) = &self.organization
            && organization.trim().is_empty()
        {
            return Err(ConfigError::Invalid("upstream.organization must be non-empty".to_string()));
        }
        if transport == ServerTransport::Stdio && self.token.is_none() {
            return Err(ConfigError::Invalid(format!(
                "stdio transport requires {} (or upstream.token)",
                env_keys::TOKEN
            )));
        }
        Ok(())
    }

    /// Returns true when the upstream is the multi-tenant cloud offering.
    #[must_use]
    pub fn is_cloud(&self) -> bool {
        Url::parse(self.url.trim())
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
            .is_some_and(|host| host == CLOUD_HOST || host.ends_with(&format!(".{CLOUD_HOST}")))
    }
}

/// Embedded analysis backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Analyzer (language) keys to initialize in the background phase.
    #[serde(default = "default_analyzers")]
    pub analyzers: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            analyzers: default_analyzers(),
        }
    }
}

impl BackendConfig {
    /// Validates analyzer keys.
    fn validate(&self) -> Result<(), ConfigError> {
        for analyzer in &self.analyzers {
            if analyzer.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "backend.analyzers entries must be non-empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Startup and shutdown timing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Grace period for stdio session workers on close, in milliseconds.
    #[serde(default = "default_stdio_close_grace_ms")]
    pub stdio_close_grace_ms: u64,
    /// Wait for background initialization during shutdown, in milliseconds.
    #[serde(default = "default_init_shutdown_wait_ms")]
    pub init_shutdown_wait_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stdio_close_grace_ms: default_stdio_close_grace_ms(),
            init_shutdown_wait_ms: default_init_shutdown_wait_ms(),
        }
    }
}

impl LifecycleConfig {
    /// Validates lifecycle timings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.stdio_close_grace_ms == 0 || self.init_shutdown_wait_ms == 0 {
            return Err(ConfigError::Invalid(
                "lifecycle timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates that a port is non-privileged and in range.
///
/// # Errors
///
/// Returns [`ConfigError`] when the port is below 1024 or above 65535.
pub fn validate_port(port: u32) -> Result<u16, ConfigError> {
    if port < MIN_HTTP_PORT {
        return Err(ConfigError::Invalid(format!(
            "http port {port} is privileged (must be >= {MIN_HTTP_PORT})"
        )));
    }
    u16::try_from(port).map_err(|_| {
        ConfigError::Invalid(format!("http port {port} out of range (must be <= {MAX_HTTP_PORT})"))
    })
}

/// Returns true when a bind host only accepts loopback connections.
#[must_use]
pub fn is_loopback_host(host: &str) -> bool {
    let trimmed = host.trim().trim_start_matches('[').trim_end_matches(']');
    if trimmed.eq_ignore_ascii_case("localhost") {
        return true;
    }
    trimmed.parse::<std::net::IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = path {
        return Ok(Some(path.to_path_buf()));
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(Some(PathBuf::from(env_path)));
    }
    let default_path = PathBuf::from(DEFAULT_CONFIG_NAME);
    Ok(default_path.is_file().then_some(default_path))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Parses a boolean environment flag.
fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid(format!("{key} must be true or false"))),
    }
}

/// Default max body size.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Default HTTP host.
fn default_http_host() -> String {
    DEFAULT_HTTP_HOST.to_string()
}

/// Default HTTP port.
const fn default_http_port() -> u32 {
    DEFAULT_HTTP_PORT
}

/// Default upstream URL.
fn default_upstream_url() -> String {
    DEFAULT_UPSTREAM_URL.to_string()
}

/// Default upstream request timeout.
const fn default_upstream_timeout_ms() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT_MS
}

/// Default analyzer set.
fn default_analyzers() -> Vec<String> {
    ["java", "javascript", "typescript", "python", "php", "xml", "html", "css"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Default stdio close grace.
const fn default_stdio_close_grace_ms() -> u64 {
    DEFAULT_STDIO_CLOSE_GRACE_MS
}

/// Default shutdown wait for background initialization.
const fn default_init_shutdown_wait_ms() -> u64 {
    DEFAULT_INIT_SHUTDOWN_WAIT_MS
}
