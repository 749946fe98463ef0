//! CLI argument structures and parsing.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use topolab_client::{ChatMode, Model};

/// Log verbosity level for CLI output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Only show errors
    Error,
    /// Show warnings and errors (default)
    #[default]
    Warn,
    /// Show informational messages, warnings, and errors
    Info,
    /// Show debug messages and above
    Debug,
    /// Show all messages including trace-level details
    Trace,
}

impl LogLevel {
    /// Convert to tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<LogLevel> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// Topolab - talk to your network topology
///
/// Chat with the topology agent and keep device configs up to date.
#[derive(Debug, Parser)]
#[command(name = "topolab")]
#[command(author, version)]
#[command(about = "Topolab - chat with the topology agent", long_about = None)]
pub struct Cli {
    /// Path to the config file (default: ~/.topolab/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// API base URL, e.g. http://localhost:8000/v1
    #[arg(long = "api-url", global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Set log verbosity level (error, warn, info, debug, trace)
    #[arg(
        long = "log-level",
        short = 'L',
        value_enum,
        global = true,
        default_value = "warn"
    )]
    pub log_level: LogLevel,

    /// Enable debug logging (same as --log-level debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Send a message and stream the agent's reply
    #[command(visible_alias = "c")]
    Chat(ChatArgs),

    /// List the chat sessions of a topology
    Sessions(SessionsArgs),

    /// Print the message history of a session
    History(HistoryArgs),

    /// Refresh device configs and follow the task until it finishes
    Refresh(RefreshArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Topology to talk about
    pub topology: String,

    /// Message to send
    #[arg(required = true, trailing_var_arg = true)]
    pub message: Vec<String>,

    /// Continue an existing session instead of starting a new one
    #[arg(long, short = 's', value_name = "ID")]
    pub session: Option<String>,

    /// Model for a new session (qwen, deepseek, gemma)
    #[arg(long, short = 'm')]
    pub model: Option<Model>,

    /// Mode for a new session (agent, ask)
    #[arg(long)]
    pub mode: Option<ChatMode>,
}

impl ChatArgs {
    /// The message words joined back into one string.
    pub fn content(&self) -> String {
        self.message.join(" ")
    }
}

#[derive(Debug, Args)]
pub struct SessionsArgs {
    pub topology: String,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    pub topology: String,
    pub session: String,
}

#[derive(Debug, Args)]
pub struct RefreshArgs {
    pub topology: String,

    /// Do not list the refreshed devices
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Write the effective configuration to the config file
    #[arg(long)]
    pub save: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Warn);
    }

    #[test]
    fn test_log_level_as_filter_str() {
        assert_eq!(LogLevel::Error.as_filter_str(), "error");
        assert_eq!(LogLevel::Warn.as_filter_str(), "warn");
        assert_eq!(LogLevel::Info.as_filter_str(), "info");
        assert_eq!(LogLevel::Debug.as_filter_str(), "debug");
        assert_eq!(LogLevel::Trace.as_filter_str(), "trace");
    }

    #[test]
    fn test_log_level_from_str_loose() {
        assert_eq!(LogLevel::from_str_loose("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str_loose("Debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str_loose("verbose"), None);
        assert_eq!(LogLevel::from_str_loose(""), None);
    }

    #[test]
    fn test_parse_chat() {
        let cli = Cli::parse_from([
            "topolab",
            "chat",
            "lab-1",
            "--model",
            "deepseek",
            "--mode",
            "ask",
            "why is",
            "R2 down?",
        ]);

        let Commands::Chat(args) = cli.command else {
            panic!("expected chat command");
        };
        assert_eq!(args.topology, "lab-1");
        assert_eq!(args.content(), "why is R2 down?");
        assert_eq!(args.model, Some(Model::Deepseek));
        assert_eq!(args.mode, Some(ChatMode::Ask));
        assert_eq!(args.session, None);
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "topolab",
            "refresh",
            "lab-1",
            "--api-url",
            "http://lab:8000/v1",
            "-v",
        ]);

        assert_eq!(cli.api_url.as_deref(), Some("http://lab:8000/v1"));
        assert!(cli.verbose);
        assert_eq!(cli.log_level, LogLevel::Warn);
        assert!(matches!(cli.command, Commands::Refresh(_)));
    }

    #[test]
    fn test_rejects_unknown_model() {
        let result = Cli::try_parse_from(["topolab", "chat", "lab-1", "-m", "gpt", "hi"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_chat_requires_message() {
        let result = Cli::try_parse_from(["topolab", "chat", "lab-1"]);
        assert!(result.is_err());
    }
}
