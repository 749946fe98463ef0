//! Styled terminal output.
//!
//! Status lines go to stderr so a streamed reply on stdout can be piped
//! cleanly. Colors are dropped when stderr is not a terminal or `NO_COLOR`
//! is set.

use std::io::IsTerminal;

use topolab_client::{Device, TaskState, TaskStatus};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

const BAR_WIDTH: usize = 24;

/// Kind of status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Error,
    Warning,
    Info,
    Dim,
}

impl Tone {
    fn color(self) -> &'static str {
        match self {
            Tone::Success => GREEN,
            Tone::Error => RED,
            Tone::Warning => YELLOW,
            Tone::Info => CYAN,
            Tone::Dim => DIM,
        }
    }

    fn icon(self) -> &'static str {
        match self {
            Tone::Success => "✓",
            Tone::Error => "✗",
            Tone::Warning => "!",
            Tone::Info => "›",
            Tone::Dim => " ",
        }
    }
}

fn colors_disabled() -> bool {
    std::env::var("NO_COLOR")
        .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

fn use_color() -> bool {
    !colors_disabled() && std::io::stderr().is_terminal()
}

/// Format a status line, optionally colored.
pub fn format_status(tone: Tone, message: &str, color: bool) -> String {
    if color {
        format!("{}{}{} {}", tone.color(), tone.icon(), RESET, message)
    } else {
        format!("{} {}", tone.icon(), message)
    }
}

/// Print a status line to stderr.
pub fn status(tone: Tone, message: &str) {
    eprintln!("{}", format_status(tone, message, use_color()));
}

/// One-line rendering of a task's progress.
pub fn format_progress(task: &TaskStatus) -> String {
    let filled = usize::from(task.progress) * BAR_WIDTH / 100;
    let bar = format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled));
    let counts = if task.total_count > 0 {
        format!(" ({}/{})", task.completed_count, task.total_count)
    } else {
        String::new()
    };
    let label = match task.state {
        TaskState::Running => "",
        TaskState::Completed => " done",
        TaskState::Failed => " failed",
    };
    format!(
        "[{bar}] {:>3}%{counts}{label} {}",
        task.progress, task.message
    )
}

/// Table row for a device.
pub fn format_device(device: &Device) -> String {
    let address = match (&device.ip_address, device.port) {
        (Some(ip), Some(port)) => format!("{ip}:{port}"),
        (Some(ip), None) => ip.clone(),
        _ => "-".to_string(),
    };
    let config = match &device.latest_config {
        Some(config) => format!("{} lines", config.lines().count()),
        None => "no config".to_string(),
    };
    format!(
        "{:<8} {:<16} {:<12} {:<22} {}",
        device.device_id,
        device.name,
        device.device_type.as_deref().unwrap_or("-"),
        address,
        config
    )
}
