//! Command dispatch and execution handlers.

use anyhow::{Context, Result};
use topolab_client::ClientConfig;

use super::args::*;
use crate::chat_cmd::run_chat;
use crate::output::{Tone, status};
use crate::refresh_cmd::run_refresh;
use crate::sessions_cmd::{run_history, run_sessions};

/// Dispatch a CLI command to its handler.
pub async fn dispatch_command(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    tracing::debug!(base_url = %config.base_url, "Loaded configuration");

    match cli.command {
        Commands::Chat(args) => run_chat(args, config).await,
        Commands::Sessions(args) => run_sessions(args, config).await,
        Commands::History(args) => run_history(args, config).await,
        Commands::Refresh(args) => run_refresh(args, config).await,
        Commands::Config(args) => show_config(args, config),
    }
}

/// Resolve the configuration: file, then environment, then flags.
pub fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = ClientConfig::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => ClientConfig::load()?,
    };
    if let Some(url) = &cli.api_url {
        config.base_url = url.clone();
    }
    Ok(config)
}

fn show_config(args: ConfigArgs, config: ClientConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{rendered}");

    if args.save {
        let path = config.save()?;
        status(Tone::Success, &format!("Saved {}", path.display()));
    }
    Ok(())
}
