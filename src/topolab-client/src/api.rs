//! HTTP client for the topolab API.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::backend::{ChatBackend, ChatResponse, TaskBackend};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::models::{
    ChatMode, Device, Message, RefreshResponse, SendRequest, SessionRef, SessionSummary,
    TaskStatusResponse,
};
use crate::{DEFAULT_API_URL, SESSION_ID_HEADER};

/// Client for the topolab REST API.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for the given base URL (e.g. "http://localhost:8000/v1").
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Create a client with the default URL.
    pub fn new_default() -> Self {
        Self::new(DEFAULT_API_URL)
    }

    /// Create a client from user configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut builder = Client::builder().connect_timeout(config.connect_timeout());
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::ConnectionFailed {
                message: e.to_string(),
            })?;
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        tracing::debug!(url = %url, "GET");
        let response = self.execute(self.client.get(&url)).await?;
        Ok(response.json().await?)
    }

    /// List the chat sessions of a topology.
    pub async fn list_sessions(&self, topology_id: &str) -> Result<Vec<SessionSummary>> {
        self.get_json(&format!("/topologies/{topology_id}/chat"))
            .await
    }

    /// Fetch the message history of a session.
    pub async fn history(&self, topology_id: &str, session_id: &str) -> Result<Vec<Message>> {
        self.get_json(&format!(
            "/topologies/{topology_id}/chat/{session_id}/history"
        ))
        .await
    }
}

/// Turn non-2xx responses into [`ClientError::Server`].
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Server {
        status: status.as_u16(),
        message: error_detail(&body),
    })
}

/// Extract the `detail` of an error body, falling back to the raw text.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => match value.get("detail") {
            Some(serde_json::Value::String(detail)) => detail.clone(),
            Some(detail) => detail.to_string(),
            None => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn send_message(
        &self,
        topology_id: &str,
        session: &SessionRef,
        mode: ChatMode,
        request: &SendRequest,
    ) -> Result<ChatResponse> {
        let url = self.url(&format!(
            "/topologies/{topology_id}/chat/{}/{}",
            session.as_path_segment(),
            mode.endpoint()
        ));
        tracing::debug!(url = %url, model = %request.model, "Sending chat message");

        let response = self
            .execute(
                self.client
                    .post(&url)
                    .header("Accept", "text/event-stream")
                    .json(request),
            )
            .await?;

        let session_id = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let body = response.bytes_stream().map_err(ClientError::from).boxed();
        Ok(ChatResponse { session_id, body })
    }

    async fn stop_agent(&self, topology_id: &str, session_id: &str) -> Result<()> {
        let url = self.url(&format!("/topologies/{topology_id}/chat/{session_id}/stop"));
        tracing::debug!(url = %url, "Stopping agent");
        self.execute(self.client.post(&url)).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskBackend for ApiClient {
    async fn refresh_configs(&self, topology_id: &str) -> Result<RefreshResponse> {
        let url = self.url(&format!("/topologies/{topology_id}/config/refresh"));
        tracing::debug!(url = %url, "Starting config refresh");
        let response = self.execute(self.client.post(&url)).await?;
        Ok(response.json().await?)
    }

    async fn task_status(&self, topology_id: &str, task_id: &str) -> Result<TaskStatusResponse> {
        self.get_json(&format!("/topologies/{topology_id}/task/{task_id}"))
            .await
    }

    async fn list_devices(&self, topology_id: &str) -> Result<Vec<Device>> {
        self.get_json(&format!("/topologies/{topology_id}/devices"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_detail() {
        assert_eq!(error_detail(r#"{"detail":"Task not found"}"#), "Task not found");
        assert_eq!(
            error_detail(r#"{"detail":[{"loc":["body","model"]}]}"#),
            r#"[{"loc":["body","model"]}]"#
        );
        assert_eq!(error_detail("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_url_joining() {
        let client = ApiClient::new("http://localhost:8000/v1/");
        assert_eq!(
            client.url("/topologies/t1/devices"),
            "http://localhost:8000/v1/topologies/t1/devices"
        );
        assert_eq!(client.base_url(), "http://localhost:8000/v1/");
    }
}
