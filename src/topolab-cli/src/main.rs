//! Topolab CLI - Main entry point.
//!
//! - `chat` - talk to the topology agent
//! - `sessions` / `history` - browse past conversations
//! - `refresh` - refresh device configs and follow the task
//! - `config` - show or save the effective configuration

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use topolab_cli::cli::{Cli, LogLevel, dispatch_command};

/// Environment variable selecting the log level when `RUST_LOG` is unset.
const LOG_LEVEL_ENV: &str = "TOPOLAB_LOG_LEVEL";

/// Logs go to stderr; stdout carries the streamed reply.
fn init_logging(cli: &Cli) {
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else if let Ok(env_level) = std::env::var(LOG_LEVEL_ENV) {
        LogLevel::from_str_loose(&env_level).unwrap_or(cli.log_level)
    } else {
        cli.log_level
    };

    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => EnvFilter::new(directives),
        _ => {
            let level = log_level.as_filter_str();
            EnvFilter::new(format!(
                "warn,topolab_cli={level},topolab_client={level},topolab_stream={level}"
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    dispatch_command(cli).await
}
