//! Events produced by the stream decoder.

/// One decoded unit of a chat response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of assistant text.
    Text { text: String },
    /// The backend reported an error. Consumers stop reading the stream.
    Error { message: String },
    /// A data record that could not be decoded. Decoding continues.
    DecodeError { line: String, reason: String },
    /// The transport signalled end of stream.
    Done,
}

impl StreamEvent {
    /// Create a text event.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create an error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done)
    }
}
