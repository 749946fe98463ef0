//! Data types shared by the chat controller, the task poller and the API client.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Wire value addressing a session that does not exist yet.
pub const NEW_SESSION_PLACEHOLDER: &str = "new";

/// Model used by the backend to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    #[default]
    Qwen,
    Deepseek,
    Gemma,
}

impl Model {
    pub const ALL: [Model; 3] = [Model::Qwen, Model::Deepseek, Model::Gemma];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qwen => "qwen",
            Self::Deepseek => "deepseek",
            Self::Gemma => "gemma",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown model '{s}' (expected qwen, deepseek or gemma)"))
    }
}

/// Backend behaviour for a session. Only agent sessions can be stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Agent,
    Ask,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Ask => "ask",
        }
    }

    /// Endpoint suffix for sending a message in this mode.
    pub fn endpoint(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "agent" => Ok(Self::Agent),
            "ask" => Ok(Self::Ask),
            _ => Err(format!("unknown mode '{s}' (expected agent or ask)")),
        }
    }
}

/// Reference to a chat session, which may not have been created yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum SessionRef {
    /// The backend creates the session on the first message.
    #[default]
    New,
    Existing(String),
}

impl SessionRef {
    /// Path segment used in endpoint URLs.
    pub fn as_path_segment(&self) -> &str {
        match self {
            Self::New => NEW_SESSION_PLACEHOLDER,
            Self::Existing(id) => id,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::New => None,
            Self::Existing(id) => Some(id),
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::New)
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path_segment())
    }
}

impl From<&str> for SessionRef {
    fn from(value: &str) -> Self {
        if value == NEW_SESSION_PLACEHOLDER {
            Self::New
        } else {
            Self::Existing(value.to_string())
        }
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Whether the backend has accepted a message yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageStatus {
    /// Appended locally before the backend acknowledged the request.
    Pending,
    #[default]
    Confirmed,
}

/// One entry of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub status: MessageStatus,
}

impl Message {
    /// Optimistic user message, pending until the backend answers.
    pub fn pending_user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            status: MessageStatus::Pending,
        }
    }

    /// Empty assistant message filled in while a response streams.
    pub fn assistant_placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            created_at: Utc::now(),
            status: MessageStatus::Confirmed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }
}

/// Session as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

impl SessionSummary {
    /// Model recorded for the session, `qwen` when missing or unknown.
    pub fn model(&self) -> Model {
        self.model
            .as_deref()
            .and_then(|m| m.parse().ok())
            .unwrap_or_default()
    }

    /// Mode recorded for the session, `ask` when missing or unknown.
    pub fn mode(&self) -> ChatMode {
        self.mode
            .as_deref()
            .and_then(|m| m.parse().ok())
            .unwrap_or(ChatMode::Ask)
    }
}

/// Body of a send-message request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendRequest {
    pub content: String,
    pub model: Model,
}

/// Lifecycle of a backend task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Running,
    Completed,
    Failed,
}

impl TaskState {
    /// Parse a wire status. Anything else is not a valid task state.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Last known status of a backend task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub id: String,
    pub state: TaskState,
    /// Percentage, 0..=100.
    pub progress: u8,
    pub message: String,
    pub completed_count: u32,
    pub total_count: u32,
}

impl TaskStatus {
    pub const DEFAULT_MESSAGE: &'static str = "Processing...";

    /// Status recorded when a task is first handed to a poller.
    pub fn started(id: impl Into<String>, message: Option<String>) -> Self {
        Self {
            id: id.into(),
            state: TaskState::Running,
            progress: 0,
            message: message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| Self::DEFAULT_MESSAGE.to_string()),
            completed_count: 0,
            total_count: 0,
        }
    }
}

/// Task status payload as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskStatusResponse {
    pub status: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub completed_devices: Option<u32>,
    #[serde(default)]
    pub total_devices: Option<u32>,
}

impl TaskStatusResponse {
    /// Convert into a [`TaskStatus`], or `None` if the status is not recognised.
    pub fn to_status(&self, task_id: &str) -> Option<TaskStatus> {
        let state = TaskState::parse(&self.status)?;
        let progress = self
            .progress
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 100.0) as u8)
            .unwrap_or(0);

        Some(TaskStatus {
            id: task_id.to_string(),
            state,
            progress,
            message: self
                .message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| TaskStatus::DEFAULT_MESSAGE.to_string()),
            completed_count: self.completed_devices.unwrap_or(0),
            total_count: self.total_devices.unwrap_or(0),
        })
    }
}

/// Response to a config refresh request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefreshResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A device of a topology, with its most recent configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(deserialize_with = "deserialize_id")]
    pub device_id: String,
    pub name: String,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub latest_config: Option<String>,
}

/// Accept ids serialized either as strings or as integers.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Accept RFC 3339 timestamps as well as naive ones, which are taken as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}
