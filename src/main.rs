//! dbexplorer CLI Entry Point
//!
//! Subcommands:
//! - `tools` - Print the tool definitions
//! - `call` - Run a single tool call
//! - `session` - Run tool calls read line by line from stdin against one registry
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use dbexplorer::{config, ErrorEnvelope, ExplorerError, LoadOptions, Registry, ToolFacade};

/// dbexplorer - Multi-database explorer with relationship discovery
#[derive(Parser)]
#[command(name = "dbexplorer")]
#[command(about = "Explore several databases at once and discover relationships between tables")]
#[command(version)]
struct Cli {
    /// Primary connection string (highest priority)
    #[arg(long, global = true)]
    conn: Option<String>,

    /// Read configuration from this file instead of the global/local lookup
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Environment file loaded before reading variables
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print tool definitions with their argument schemas
    Tools,

    /// Run one tool call and print its envelope
    Call {
        /// Tool name (see `dbexplorer tools`)
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Read `{"tool": ..., "arguments": {...}}` requests from stdin, one per line
    Session,
}

/// One line of a session
#[derive(Debug, Deserialize)]
struct SessionRequest {
    tool: String,
    #[serde(default)]
    arguments: Value,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dbexplorer=info,warn"));

    // JSON logs on stderr; stdout carries only envelopes
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .json()
        .init();
}

fn emit(value: &Value) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, value).context("failed to encode output")?;
    writeln!(stdout).context("failed to write output")?;
    stdout.flush().context("failed to flush output")?;
    Ok(())
}

fn error_envelope(tool: &str, err: &ExplorerError) -> Value {
    serde_json::to_value(ErrorEnvelope::from_error(tool, err)).unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Tools = cli.command {
        return emit(&serde_json::to_value(dbexplorer::tool_definitions())?);
    }

    let options = LoadOptions { config_file: cli.config, env_file: Some(cli.env_file), primary: cli.conn };
    let settings = match config::load(&options) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            emit(&error_envelope("startup", &e))?;
            std::process::exit(1);
        }
    };

    let (registry, _failures) = Registry::from_settings(&settings);
    let registry = Arc::new(registry);
    let facade = ToolFacade::new(Arc::clone(&registry), settings.query.clone());

    let outcome = match cli.command {
        Commands::Tools => Ok(true),
        Commands::Call { tool, args } => run_call(&facade, &tool, &args).await,
        Commands::Session => run_session(&facade).await.map(|()| true),
    };

    registry.close_all();
    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}

/// Returns whether the call succeeded
async fn run_call(facade: &ToolFacade, tool: &str, args: &str) -> Result<bool> {
    let envelope = match serde_json::from_str::<Value>(args) {
        Ok(arguments) => facade.invoke(tool, arguments).await,
        Err(e) => error_envelope(tool, &ExplorerError::invalid_input(format!("--args is not valid JSON: {e}"))),
    };
    emit(&envelope)?;
    Ok(envelope["ok"] == Value::Bool(true))
}

async fn run_session(facade: &ToolFacade) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tracing::info!("session started");

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        let envelope = match serde_json::from_str::<SessionRequest>(&line) {
            Ok(request) => facade.invoke(&request.tool, request.arguments).await,
            Err(e) => error_envelope(
                "session",
                &ExplorerError::invalid_input(format!("expected {{\"tool\": ..., \"arguments\": {{...}}}}: {e}")),
            ),
        };
        emit(&envelope)?;
    }

    tracing::info!("session ended");
    Ok(())
}
