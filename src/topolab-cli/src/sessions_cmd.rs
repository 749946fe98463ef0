//! `topolab sessions` and `topolab history`.

use anyhow::Result;
use topolab_client::{ApiClient, ClientConfig, Message, Role, SessionSummary};

use crate::cli::args::{HistoryArgs, SessionsArgs};
use crate::output::{Tone, status};

pub async fn run_sessions(args: SessionsArgs, config: ClientConfig) -> Result<()> {
    let api = ApiClient::from_config(&config)?;
    let sessions = api.list_sessions(&args.topology).await?;

    if sessions.is_empty() {
        status(Tone::Info, "No chat sessions yet");
        return Ok(());
    }
    for session in &sessions {
        println!("{}", format_session(session));
    }
    Ok(())
}

pub async fn run_history(args: HistoryArgs, config: ClientConfig) -> Result<()> {
    let api = ApiClient::from_config(&config)?;
    let messages = api.history(&args.topology, &args.session).await?;

    for message in &messages {
        println!("{}\n", format_message(message));
    }
    Ok(())
}

fn format_session(session: &SessionSummary) -> String {
    format!(
        "{:<10} {:<9} {:<6} {}",
        session.id,
        session.model().as_str(),
        session.mode().as_str(),
        session.title.as_deref().unwrap_or("(untitled)")
    )
}

fn format_message(message: &Message) -> String {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "agent",
    };
    format!(
        "[{}] {who}:\n{}",
        message.created_at.format("%Y-%m-%d %H:%M"),
        message.content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_session_defaults() {
        let session = SessionSummary {
            id: "12".to_string(),
            title: None,
            model: None,
            mode: None,
        };
        assert_eq!(
            format_session(&session),
            "12         qwen      ask    (untitled)"
        );
    }

    #[test]
    fn test_format_message() {
        let message: Message = serde_json::from_str(
            r#"{"role":"assistant","content":"All good","created_at":"2024-05-01T10:00:05Z"}"#,
        )
        .unwrap();
        assert_eq!(
            format_message(&message),
            "[2024-05-01 10:00] agent:\nAll good"
        );
    }
}
