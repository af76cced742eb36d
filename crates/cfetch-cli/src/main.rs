//! # cfetch CLI
//!
//! Restores deduplicated backup payloads from encrypted chunk containers.

use std::process::ExitCode;

use anyhow::Result;
use cfetch_config::log_cli_warn;
use cfetch_config::logging::{init_logging, LogLevel};
use clap::{Parser, Subcommand};

mod config_cmd;
mod restore;

/// cfetch - concurrent fetch, decrypt and dedup of chunked backups
#[derive(Parser)]
#[command(name = "cfetch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level when neither CFETCH_LOG nor RUST_LOG is set
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, decrypt and reassemble every signature of an authorization result
    Restore(restore::RestoreArgs),

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: config_cmd::ConfigCommands,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let configured = cfetch_config::config().log.level.clone();
    let (level, invalid) = log_level(cli.log_level, &configured);
    init_logging(level);
    if let Some(err) = invalid {
        log_cli_warn!(
            "Ignoring [log] level from config",
            error = err.as_str(),
            fallback = level.as_str(),
        );
    }

    match cli.command {
        Commands::Restore(args) => restore::run(args),
        Commands::Config { command } => {
            config_cmd::run(command)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Level from the command line, else from `[log] level`.
///
/// An unparsable configured value falls back to `info`, the configured
/// default, and the parse error is handed back for reporting.
fn log_level(flag: Option<LogLevel>, configured: &str) -> (LogLevel, Option<String>) {
    match flag {
        Some(level) => (level, None),
        None => match configured.parse() {
            Ok(level) => (level, None),
            Err(err) => (LogLevel::Info, Some(err)),
        },
    }
}
