//! Topolab client
//!
//! Talks to the topolab backend on behalf of a user-facing front end:
//!
//! - [`ChatSession`] sends messages to the topology agent and applies the
//!   streamed reply to an in-memory conversation.
//! - [`TaskPoller`] follows a long-running backend task (such as a config
//!   refresh) by polling its status and publishing it on a [`TaskBoard`].
//! - [`ApiClient`] is the HTTP implementation of the [`ChatBackend`] and
//!   [`TaskBackend`] seams both controllers are written against.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use topolab_client::{ApiClient, ChatSession, ClientConfig, TaskBoard, TaskPoller};
//!
//! let config = ClientConfig::load()?;
//! let api = ApiClient::from_config(&config)?;
//!
//! let chat = ChatSession::new(api.clone(), "topology-1");
//! let session = chat.send("Which routers have OSPF enabled?").await?;
//! println!("{}", chat.messages().last().unwrap().content);
//!
//! let board = TaskBoard::new();
//! let mut poller = TaskPoller::new(Arc::new(api), board.clone(), config.poll.timing());
//! poller.start_refresh("topology-1").await?;
//! poller.wait_terminated().await;
//! ```

mod api;
mod backend;
mod chat;
mod config;
mod error;
mod models;
mod poller;

pub use api::ApiClient;
pub use backend::{ByteStream, ChatBackend, ChatResponse, TaskBackend};
pub use chat::{ChatSession, Session};
pub use config::{API_URL_ENV, ClientConfig, HOME_ENV, PollConfig};
pub use error::{ClientError, Result};
pub use models::{
    ChatMode, Device, Message, MessageStatus, Model, NEW_SESSION_PLACEHOLDER, RefreshResponse,
    Role, SendRequest, SessionRef, SessionSummary, TaskState, TaskStatus, TaskStatusResponse,
};
pub use poller::{POLL_FAILED_MESSAGE, PollState, PollTiming, TaskBoard, TaskPoller};

/// Default API base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/v1";

/// Response header carrying the id of a newly created chat session.
pub const SESSION_ID_HEADER: &str = "X-Session-ID";
