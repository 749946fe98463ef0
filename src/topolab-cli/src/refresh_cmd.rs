//! `topolab refresh`: refresh device configs and follow the task.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use topolab_client::{ApiClient, ClientConfig, TaskBoard, TaskPoller};

use crate::cli::args::RefreshArgs;
use crate::output::{Tone, format_device, format_progress, status};

const RENDER_INTERVAL: Duration = Duration::from_millis(250);

/// Prints the board's task whenever its rendering changes.
#[derive(Debug, Default)]
struct ProgressView {
    last: Option<String>,
}

impl ProgressView {
    fn render(&mut self, board: &TaskBoard) {
        let Some(task) = board.current_task() else {
            return;
        };
        let line = format_progress(&task);
        if self.last.as_ref() != Some(&line) {
            status(Tone::Dim, &line);
            self.last = Some(line);
        }
    }
}

pub async fn run_refresh(args: RefreshArgs, config: ClientConfig) -> Result<()> {
    let api = Arc::new(ApiClient::from_config(&config)?);
    let board = TaskBoard::new();
    let mut poller = TaskPoller::new(api, board.clone(), config.poll.timing());

    let response = poller
        .start_refresh(&args.topology)
        .await
        .context("Failed to start config refresh")?;
    if let Some(message) = &response.message {
        status(Tone::Info, message);
    }

    let mut view = ProgressView::default();
    let mut ticker = tokio::time::interval(RENDER_INTERVAL);
    loop {
        tokio::select! {
            _ = poller.wait_terminated() => break,
            _ = ticker.tick() => view.render(&board),
            signal = tokio::signal::ctrl_c() => {
                signal?;
                poller.cancel();
                status(
                    Tone::Warning,
                    "Stopped following the task; the refresh continues on the server",
                );
                return Ok(());
            }
        }
    }
    view.render(&board);

    if let Some(error) = board.error() {
        bail!(error);
    }
    status(Tone::Success, "Config refresh completed");

    if !args.quiet {
        for device in board.devices() {
            println!("{}", format_device(&device));
        }
    }
    Ok(())
}
