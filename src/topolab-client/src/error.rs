//! Error types for topolab-client.

use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to the topolab backend.
#[derive(Debug, Error)]
pub enum ClientError {
    // Transport errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to connect to topolab API: {message}")]
    ConnectionFailed { message: String },

    #[error("Server returned error {status}: {message}")]
    Server { status: u16, message: String },

    // Payload errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config refresh response did not include a task id")]
    MissingTaskId,

    // Caller errors
    #[error("Message content must not be empty")]
    EmptyMessage,

    #[error("Task poller already started")]
    PollerAlreadyStarted,

    // Config errors
    #[error("Failed to load config: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Check if this error happened at the network layer.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::ConnectionFailed { .. } | Self::Server { .. }
        )
    }

    /// HTTP status reported by the backend, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_classification() {
        assert!(
            ClientError::ConnectionFailed {
                message: "refused".into()
            }
            .is_network_error()
        );
        assert!(
            ClientError::Server {
                status: 404,
                message: "Task not found".into()
            }
            .is_network_error()
        );
        assert!(!ClientError::EmptyMessage.is_network_error());
        assert!(!ClientError::PollerAlreadyStarted.is_network_error());
    }

    #[test]
    fn test_server_error_display() {
        let err = ClientError::Server {
            status: 400,
            message: "No devices found. Sync first.".into(),
        };
        assert_eq!(err.status(), Some(400));
        assert_eq!(
            err.to_string(),
            "Server returned error 400: No devices found. Sync first."
        );
    }
}
