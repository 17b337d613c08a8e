// crates/sonar-mcp-cli/src/main.rs
// ============================================================================
// Module: Sonar MCP CLI Entry Point
// Description: Command dispatcher for serving and validating Sonar MCP config.
// Purpose: Start the MCP server and stop it cleanly on signals or EOF.
// Dependencies: clap, sonar-mcp, sonar-mcp-config, thiserror, tokio, tracing
// ============================================================================

//! ## Overview
//! `sonar-mcp serve` loads configuration, starts the configured transport,
//! and waits for the transport to end or for a termination signal before
//! running the ordered shutdown. `sonar-mcp config validate` loads and
//! validates configuration without starting anything.
//!
//! Logs always go to stderr so the stdio transport owns stdout.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use sonar_mcp::ServerComponents;
use sonar_mcp::ServerLifecycle;
use sonar_mcp_config::SonarMcpConfig;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable holding the log filter directive.
const LOG_FILTER_ENV: &str = "SONAR_MCP_LOG";
/// Filter used when no directive is set.
const DEFAULT_LOG_FILTER: &str = "info";
/// Upper bound on runtime teardown once the command has returned.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level command line.
#[derive(Parser, Debug)]
#[command(name = "sonar-mcp", version, disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the MCP server.
    Serve(ServeCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Arguments for `serve`.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Optional config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate configuration.
    Validate(ConfigValidateCommand),
}

/// Arguments for `config validate`.
#[derive(Args, Debug)]
struct ConfigValidateCommand {
    /// Optional config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failure carrying a user-facing message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Message written to stderr.
    message: String,
}

impl CliError {
    /// Creates a CLI error.
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// Result alias for CLI operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Runs the CLI and maps failures to a non-zero exit code.
///
/// A pending read on an open stdin cannot be cancelled, so runtime teardown
/// is bounded instead of waiting on every blocking task.
fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => return emit_error(&format!("failed to start runtime: {err}")),
    };
    let result = runtime.block_on(run());
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    match result {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Parses arguments and dispatches the selected command.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    init_tracing();
    match cli.command {
        Some(Commands::Serve(command)) => command_serve(command).await,
        Some(Commands::Config {
            command: ConfigCommand::Validate(command),
        }) => command_config_validate(&command),
        None => command_serve(ServeCommand {
            config: None,
        })
        .await,
    }
}

/// Installs the stderr log subscriber.
fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Runs the server until the transport ends or a signal arrives.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config)?;
    let server = ServerLifecycle::new(config, ServerComponents::default())
        .map_err(|err| CliError::new(format!("failed to build server: {err}")))?;
    server.start().await.map_err(|err| CliError::new(format!("failed to start server: {err}")))?;

    tokio::select! {
        () = server.wait() => {
            tracing::info!("transport closed");
        }
        () = shutdown_signal() => {}
    }
    server.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

/// Loads and validates configuration, then reports success.
fn command_config_validate(command: &ConfigValidateCommand) -> CliResult<ExitCode> {
    let _config = load_config(command.config.clone())?;
    write_stdout_line("config ok")
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Loads configuration from an optional path.
fn load_config(path: Option<PathBuf>) -> CliResult<SonarMcpConfig> {
    SonarMcpConfig::load(path.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

/// Resolves when the process receives Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Reports an error on stderr and returns a failing exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
