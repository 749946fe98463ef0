//! Chat session controller.
//!
//! A [`ChatSession`] drives one conversation with the backend agent. Each
//! [`ChatSession::send`] appends the user message, issues the request, and
//! applies the decoded response stream to the message list as it arrives.
//!
//! State lives behind a mutex that is never held across an await point, so
//! [`ChatSession::stop`] can run while a `send` is still streaming, e.g. from
//! another branch of `tokio::select!`.

use std::ops::ControlFlow;

use futures::StreamExt;
use parking_lot::Mutex;
use topolab_stream::{StreamDecoder, StreamEvent};

use crate::backend::{ByteStream, ChatBackend};
use crate::error::{ClientError, Result};
use crate::models::{
    ChatMode, Message, MessageStatus, Model, SendRequest, SessionRef, SessionSummary,
};

/// Configuration of the current session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub id: SessionRef,
    pub model: Model,
    pub mode: ChatMode,
    /// Set by the first accepted message or by resuming. Model and mode are
    /// fixed from then on.
    pub started: bool,
}

#[derive(Default)]
struct ChatState {
    session: Session,
    messages: Vec<Message>,
    streaming: bool,
    error: Option<String>,
    /// Sequence number of the most recent send. Only that send may clear
    /// `streaming` or report errors.
    latest_send: u64,
    /// Bumped whenever `messages` is replaced, so a stream still running
    /// from before a `reset`/`resume` cannot write into the new list.
    epoch: u64,
}

impl ChatState {
    fn is_latest(&self, ticket: &SendTicket) -> bool {
        self.latest_send == ticket.seq
    }

    fn owns_messages(&self, ticket: &SendTicket) -> bool {
        self.epoch == ticket.epoch
    }

    /// End the stream of `ticket`, unless a newer send has taken over.
    fn finish_stream(&mut self, ticket: &SendTicket) {
        if self.is_latest(ticket) {
            self.streaming = false;
        }
    }

    fn start_new_list(&mut self) {
        self.epoch += 1;
        self.streaming = false;
    }
}

/// Identifies one `send` and the assistant message its stream writes to.
#[derive(Debug, Clone, Copy)]
struct SendTicket {
    seq: u64,
    epoch: u64,
    /// Index of this send's assistant message, once the request is accepted.
    reply: Option<usize>,
}

/// Controller for a chat conversation within one topology.
pub struct ChatSession<B> {
    backend: B,
    topology_id: String,
    state: Mutex<ChatState>,
}

impl<B: ChatBackend> ChatSession<B> {
    /// Start a fresh, not yet created session.
    pub fn new(backend: B, topology_id: impl Into<String>) -> Self {
        Self {
            backend,
            topology_id: topology_id.into(),
            state: Mutex::new(ChatState::default()),
        }
    }

    pub fn topology_id(&self) -> &str {
        &self.topology_id
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Snapshot of the session configuration.
    pub fn session(&self) -> Session {
        self.state.lock().session.clone()
    }

    /// Snapshot of the conversation.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    /// Last error reported by the backend or the transport.
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// Choose the model. Ignored once the session has started.
    pub fn set_model(&self, model: Model) {
        let mut state = self.state.lock();
        if state.session.started {
            tracing::debug!(model = %model, "Session started, model change ignored");
            return;
        }
        state.session.model = model;
    }

    /// Choose the mode. Ignored once the session has started.
    pub fn set_mode(&self, mode: ChatMode) {
        let mut state = self.state.lock();
        if state.session.started {
            tracing::debug!(mode = %mode, "Session started, mode change ignored");
            return;
        }
        state.session.mode = mode;
    }

    /// Continue an existing session with its stored history.
    pub fn resume(&self, summary: &SessionSummary, history: Vec<Message>) {
        let mut state = self.state.lock();
        state.session = Session {
            id: SessionRef::Existing(summary.id.clone()),
            model: summary.model(),
            mode: summary.mode(),
            started: true,
        };
        state.messages = history;
        state.error = None;
        state.start_new_list();
        tracing::info!(session_id = %summary.id, "Resumed chat session");
    }

    /// Begin a new session. Model and mode carry over.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let Session { model, mode, .. } = state.session;
        state.session = Session {
            id: SessionRef::New,
            model,
            mode,
            started: false,
        };
        state.messages.clear();
        state.error = None;
        state.start_new_list();
    }

    /// Send a message and stream the reply into the conversation.
    ///
    /// Returns the session the reply belongs to: the id assigned by the
    /// backend if it reported one, otherwise the session the message was
    /// sent to. An error record in the stream ends consumption early and is
    /// reported through [`ChatSession::error`], not as an `Err`.
    ///
    /// Each send streams into its own assistant message. A stream that keeps
    /// delivering after [`ChatSession::stop`] never touches the reply of a
    /// later send.
    pub async fn send(&self, content: &str) -> Result<SessionRef> {
        if content.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let (target, mode, request, user_index, ticket) = {
            let mut state = self.state.lock();
            state.messages.push(Message::pending_user(content));
            state.streaming = true;
            state.error = None;
            state.latest_send += 1;
            let ticket = SendTicket {
                seq: state.latest_send,
                epoch: state.epoch,
                reply: None,
            };
            (
                state.session.id.clone(),
                state.session.mode,
                SendRequest {
                    content: content.to_string(),
                    model: state.session.model,
                },
                state.messages.len() - 1,
                ticket,
            )
        };

        let response = match self
            .backend
            .send_message(&self.topology_id, &target, mode, &request)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, session = %target, "Failed to send chat message");
                self.fail(&e, &ticket);
                return Err(e);
            }
        };

        let (resolved, ticket) = self.accept(&target, response.session_id, user_index, ticket);
        self.consume(response.body, resolved, ticket).await
    }

    /// Stop the running agent.
    ///
    /// Does nothing unless the session is an existing agent session. The
    /// local streaming flag is cleared straight away; the backend may still
    /// deliver a few chunks afterwards.
    pub async fn stop(&self) -> Result<()> {
        let session_id = {
            let mut state = self.state.lock();
            if state.session.mode != ChatMode::Agent {
                return Ok(());
            }
            let Some(id) = state.session.id.id().map(str::to_string) else {
                return Ok(());
            };
            state.streaming = false;
            id
        };

        tracing::info!(session_id = %session_id, "Stopping agent");
        if let Err(e) = self.backend.stop_agent(&self.topology_id, &session_id).await {
            tracing::warn!(error = %e, session_id = %session_id, "Stop request failed");
            self.state.lock().error = Some(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// Record the accepted request and open the assistant placeholder.
    fn accept(
        &self,
        target: &SessionRef,
        assigned: Option<String>,
        user_index: usize,
        mut ticket: SendTicket,
    ) -> (SessionRef, SendTicket) {
        let mut state = self.state.lock();
        let resolved = assigned
            .clone()
            .map(SessionRef::Existing)
            .unwrap_or_else(|| target.clone());

        if !state.owns_messages(&ticket) {
            tracing::debug!(session = %resolved, "Conversation replaced while sending, reply dropped");
            return (resolved, ticket);
        }

        if let Some(message) = state.messages.get_mut(user_index) {
            message.status = MessageStatus::Confirmed;
        }
        state.messages.push(Message::assistant_placeholder());
        ticket.reply = Some(state.messages.len() - 1);

        match (target, assigned.as_deref()) {
            (SessionRef::New, Some(id)) => {
                tracing::info!(session_id = %id, "Backend created chat session");
                state.session.id = SessionRef::Existing(id.to_string());
                state.session.started = true;
            }
            (SessionRef::New, None) => {
                tracing::warn!("Backend did not report an id for the new session");
            }
            (SessionRef::Existing(_), _) => state.session.started = true,
        }

        (resolved, ticket)
    }

    async fn consume(
        &self,
        mut body: ByteStream,
        resolved: SessionRef,
        ticket: SendTicket,
    ) -> Result<SessionRef> {
        let mut decoder = StreamDecoder::new();

        loop {
            let (events, ended) = match body.next().await {
                Some(Ok(chunk)) => (decoder.feed(&chunk), false),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Chat stream interrupted");
                    self.fail(&e, &ticket);
                    return Err(e);
                }
                None => (decoder.close(), true),
            };
            if self.apply(events, &ticket).is_break() || ended {
                return Ok(resolved);
            }
        }
    }

    fn apply(&self, events: Vec<StreamEvent>, ticket: &SendTicket) -> ControlFlow<()> {
        let mut state = self.state.lock();
        for event in events {
            match event {
                StreamEvent::Text { text } => {
                    if state.owns_messages(ticket)
                        && let Some(index) = ticket.reply
                        && let Some(message) = state.messages.get_mut(index)
                    {
                        message.content.push_str(&text);
                    }
                }
                StreamEvent::Error { message } => {
                    tracing::warn!(error = %message, "Backend reported a stream error");
                    if state.is_latest(ticket) {
                        state.error = Some(message);
                    }
                    state.finish_stream(ticket);
                    return ControlFlow::Break(());
                }
                StreamEvent::DecodeError { line, reason } => {
                    tracing::warn!(line = %line, reason = %reason, "Failed to decode stream record");
                }
                StreamEvent::Done => {
                    state.finish_stream(ticket);
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn fail(&self, error: &ClientError, ticket: &SendTicket) {
        let mut state = self.state.lock();
        if state.is_latest(ticket) {
            state.error = Some(error.to_string());
        }
        state.finish_stream(ticket);
    }
}
