//! Roster: directory to learning-platform reconciliation batch.
//!
//! # Usage
//!
//! ```text
//! roster [--config <path>] [-v] [--log-json] sync [--full] [--purge-cohorts] [--dry-run] [--unit <KEY>]... [--json]
//! roster [--config <path>] watermarks [--json]
//! roster [--config <path>] init-store
//! ```
//!
//! Exits `0` on success and `2` on any unrecoverable error.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{init_store::InitStoreArgs, sync::SyncArgs, watermarks::WatermarksArgs};
use roster_core::{config, Config};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "roster",
    version,
    about = "Reconcile directory people and units into the learning platform store",
    long_about = None,
)]
struct Cli {
    /// Configuration file (default: ~/.roster/config.yaml).
    #[arg(long, global = true, env = "ROSTER_CONFIG")]
    config: Option<PathBuf>,

    /// Raise log verbosity (`-v` debug, `-vv` trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile the configured units against the directory.
    Sync(SyncArgs),

    /// Show the stored per-unit watermarks.
    Watermarks(WatermarksArgs),

    /// Create the store schema and seed roles (local bootstrap).
    InitStore(InitStoreArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing(verbose: u8, json: bool) {
    let fallback = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path,
        None => config::default_path()?,
    };
    config::load_at(&path).with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn dispatch(cli: Cli) -> Result<()> {
    let config = load_config(cli.config)?;
    match cli.command {
        Commands::Sync(args) => args.run(&config),
        Commands::Watermarks(args) => args.run(&config),
        Commands::InitStore(args) => args.run(&config),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "roster failed");
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}
