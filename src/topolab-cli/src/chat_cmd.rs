//! `topolab chat`: send one message and stream the reply.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use topolab_client::{ApiClient, ChatMode, ChatSession, ClientConfig, Message, Role};

use crate::cli::args::ChatArgs;
use crate::output::{Tone, status};

/// How often the streamed reply is flushed to stdout.
const FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Tracks how much of the streamed reply has been written.
#[derive(Debug, Default)]
pub struct ReplyPrinter {
    /// Messages that existed before the send, e.g. resumed history.
    baseline: usize,
    printed: usize,
}

impl ReplyPrinter {
    pub fn new(baseline: usize) -> Self {
        Self {
            baseline,
            printed: 0,
        }
    }

    /// Text of the reply that has not been printed yet.
    pub fn take(&mut self, messages: &[Message]) -> Option<String> {
        let reply = messages
            .get(self.baseline..)?
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)?;
        let unseen = reply.content.get(self.printed..)?;
        if unseen.is_empty() {
            return None;
        }
        self.printed = reply.content.len();
        Some(unseen.to_string())
    }

    pub fn has_printed(&self) -> bool {
        self.printed > 0
    }

    fn flush(&mut self, messages: &[Message]) -> io::Result<()> {
        if let Some(text) = self.take(messages) {
            let mut out = io::stdout().lock();
            out.write_all(text.as_bytes())?;
            out.flush()?;
        }
        Ok(())
    }
}

pub async fn run_chat(args: ChatArgs, config: ClientConfig) -> Result<()> {
    let api = ApiClient::from_config(&config)?;
    let chat = ChatSession::new(api, args.topology.clone());

    match &args.session {
        Some(session_id) => {
            resume(&chat, &args.topology, session_id).await?;
            if args.model.is_some() || args.mode.is_some() {
                status(
                    Tone::Warning,
                    "--model and --mode only apply to new sessions",
                );
            }
        }
        None => {
            chat.set_model(args.model.unwrap_or(config.model));
            chat.set_mode(args.mode.unwrap_or(config.mode));
        }
    }

    let content = args.content();
    let mut printer = ReplyPrinter::new(chat.messages().len());
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    let mut stop_requested = false;

    let send = chat.send(&content);
    tokio::pin!(send);

    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            _ = ticker.tick() => printer.flush(&chat.messages())?,
            signal = tokio::signal::ctrl_c(), if !stop_requested => {
                signal?;
                stop_requested = true;

                let session = chat.session();
                if session.mode != ChatMode::Agent || session.id.is_new() {
                    printer.flush(&chat.messages())?;
                    println!();
                    status(Tone::Warning, "Interrupted");
                    return Ok(());
                }

                status(Tone::Warning, "Stopping agent...");
                if let Err(e) = chat.stop().await {
                    status(Tone::Error, &format!("Failed to stop agent: {e}"));
                }
            }
        }
    };

    printer.flush(&chat.messages())?;
    if printer.has_printed() {
        println!();
    }

    let session = result?;
    if let Some(error) = chat.error() {
        bail!(error);
    }
    status(Tone::Dim, &format!("session {session}"));
    Ok(())
}

async fn resume(chat: &ChatSession<ApiClient>, topology: &str, session_id: &str) -> Result<()> {
    let api = chat.backend();
    let summary = api
        .list_sessions(topology)
        .await?
        .into_iter()
        .find(|s| s.id == session_id)
        .with_context(|| format!("Session {session_id} not found in topology {topology}"))?;
    let history = api
        .history(topology, session_id)
        .await
        .with_context(|| format!("Failed to load history of session {session_id}"))?;

    tracing::debug!(
        session_id = %session_id,
        messages = history.len(),
        "Loaded session history"
    );
    chat.resume(&summary, history);
    Ok(())
}
