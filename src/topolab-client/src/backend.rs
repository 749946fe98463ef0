//! Backend seams used by the chat controller and the task poller.
//!
//! [`crate::ApiClient`] implements both traits over HTTP. Tests and embedders
//! can supply their own implementations.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::models::{
    ChatMode, Device, RefreshResponse, SendRequest, SessionRef, TaskStatusResponse,
};

/// Raw response body, chunk by chunk, in arrival order.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Accepted send-message request.
pub struct ChatResponse {
    /// Session id assigned by the backend, if it reported one.
    pub session_id: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatResponse")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Chat endpoints.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send a message and return once response headers are in.
    async fn send_message(
        &self,
        topology_id: &str,
        session: &SessionRef,
        mode: ChatMode,
        request: &SendRequest,
    ) -> Result<ChatResponse>;

    /// Ask the backend to stop an agent run.
    async fn stop_agent(&self, topology_id: &str, session_id: &str) -> Result<()>;
}

/// Background task endpoints.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Start a config refresh for every device of a topology.
    async fn refresh_configs(&self, topology_id: &str) -> Result<RefreshResponse>;

    /// Fetch the status of a task.
    async fn task_status(&self, topology_id: &str, task_id: &str) -> Result<TaskStatusResponse>;

    /// Fetch the devices of a topology.
    async fn list_devices(&self, topology_id: &str) -> Result<Vec<Device>>;
}
