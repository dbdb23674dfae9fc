// crates/watchkeeper-cli/src/main.rs
// ============================================================================
// Module: Watchkeeper CLI Entry Point
// Description: Command dispatcher for serving and store inspection.
// Purpose: Provide the `watchkeeper` binary: serve, config validation, and
//          offline store reads.
// Dependencies: clap, tokio, tracing-subscriber, watchkeeper-core,
//               watchkeeper-server, watchkeeper-store-sqlite
// ============================================================================

//! ## Overview
//! The CLI is thin: `serve` runs the control plane, `config validate` parses
//! and checks the full configuration tree, and the `store` subcommands read
//! the store offline for debugging. Exit code 0 means success; any fatal
//! initialization failure (schema mismatch, address in use, config parse
//! error) exits nonzero.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use thiserror::Error;
use watchkeeper_core::EventFilter;
use watchkeeper_core::EventLog;
use watchkeeper_core::StateKey;
use watchkeeper_core::StateStore;
use watchkeeper_server::WatchkeeperConfig;
use watchkeeper_store_sqlite::SqliteControlStore;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "watchkeeper", version)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the Watchkeeper control plane.
    Serve(ServeCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Offline store inspection utilities.
    Store {
        /// Selected store subcommand.
        #[command(subcommand)]
        command: StoreCommand,
    },
}

/// Configuration for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Optional config file path (defaults to watchkeeper.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate the configuration and its referenced documents.
    Validate(ConfigValidateCommand),
}

/// Arguments for `config validate`.
#[derive(Args, Debug)]
struct ConfigValidateCommand {
    /// Optional config file path (defaults to watchkeeper.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Store subcommands.
#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Print recent events as JSON lines.
    Events(StoreEventsCommand),
    /// Print current state entries for a prefix.
    State(StoreStateCommand),
    /// Print store row counts.
    Counts(StoreLocationArgs),
}

/// Store location inputs for offline reads.
#[derive(Args, Debug, Clone)]
struct StoreLocationArgs {
    /// Optional config file path (defaults to watchkeeper.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments for `store events`.
#[derive(Args, Debug)]
struct StoreEventsCommand {
    /// Store location settings.
    #[command(flatten)]
    location: StoreLocationArgs,
    /// Maximum number of events.
    #[arg(long, value_name = "COUNT", default_value_t = 50)]
    limit: u64,
    /// Only events with this correlation id.
    #[arg(long, value_name = "ID")]
    correlation_id: Option<String>,
}

/// Arguments for `store state`.
#[derive(Args, Debug)]
struct StoreStateCommand {
    /// Store location settings.
    #[command(flatten)]
    location: StoreLocationArgs,
    /// Dotted key prefix (empty for all).
    #[arg(long, value_name = "PREFIX", default_value = "")]
    prefix: String,
    /// Single key to fetch (overrides the prefix).
    #[arg(long, value_name = "KEY")]
    key: Option<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();
    match run().await {
        Ok(code) => code,
        Err(err) => {
            let _ = writeln!(std::io::stderr().lock(), "error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::Config {
            command,
        } => command_config(&command),
        Commands::Store {
            command,
        } => command_store(command),
    }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = WatchkeeperConfig::load(command.config.as_deref())
        .map_err(|err| CliError::new(format!("config load failed: {err}")))?;
    watchkeeper_server::run(config)
        .await
        .map_err(|err| CliError::new(err.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Executes a `config` subcommand.
fn command_config(command: &ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate(args) => {
            let config = WatchkeeperConfig::load(args.config.as_deref())
                .map_err(|err| CliError::new(format!("config invalid: {err}")))?;
            write_stdout_line(&format!(
                "config ok: {} tools guarded, {} conditions",
                config.standing_orders.guards.len(),
                config.standing_orders.conditions.len(),
            ))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ============================================================================
// SECTION: Store Commands
// ============================================================================

/// Executes a `store` subcommand.
fn command_store(command: StoreCommand) -> CliResult<ExitCode> {
    match command {
        StoreCommand::Events(args) => {
            let store = open_store(args.location.config.as_deref())?;
            let filter = EventFilter {
                limit: Some(args.limit),
                since_seq: None,
                correlation_id: args.correlation_id.map(Into::into),
                event_type: None,
            };
            let events =
                store.read_events(&filter).map_err(|err| CliError::new(err.to_string()))?;
            for event in events {
                write_stdout_line(&encode_json(&event)?)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        StoreCommand::State(args) => {
            let store = open_store(args.location.config.as_deref())?;
            match args.key {
                Some(raw_key) => {
                    let key = StateKey::parse(&raw_key)
                        .map_err(|err| CliError::new(err.to_string()))?;
                    let entry = store
                        .get_state(&key)
                        .map_err(|err| CliError::new(err.to_string()))?;
                    write_stdout_line(&encode_json(&entry)?)?;
                }
                None => {
                    let entries = store
                        .list_state(&args.prefix)
                        .map_err(|err| CliError::new(err.to_string()))?;
                    for entry in entries {
                        write_stdout_line(&encode_json(&entry)?)?;
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        StoreCommand::Counts(location) => {
            let store = open_store(location.config.as_deref())?;
            let counts = store.counts().map_err(|err| CliError::new(err.to_string()))?;
            write_stdout_line(&encode_json(&counts)?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Opens the store named by the configuration, read paths only.
fn open_store(config_path: Option<&std::path::Path>) -> CliResult<SqliteControlStore> {
    let config = WatchkeeperConfig::load(config_path)
        .map_err(|err| CliError::new(format!("config load failed: {err}")))?;
    SqliteControlStore::new(&config.store).map_err(|err| CliError::new(err.to_string()))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Encodes a value as compact JSON.
fn encode_json<T: serde::Serialize>(value: &T) -> CliResult<String> {
    serde_json::to_string(value).map_err(|err| CliError::new(err.to_string()))
}

/// Writes one line to stdout.
fn write_stdout_line(line: &str) -> CliResult<()> {
    writeln!(std::io::stdout().lock(), "{line}")
        .map_err(|err| CliError::new(format!("stdout write failed: {err}")))
}
