//! Protocol error taxonomy

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// A malformed line or payload from a source.
///
/// Logged with source identity; the record is dropped and the connection
/// continues.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// An SHDR line that cannot be interpreted
    #[error("Malformed SHDR line: {reason}: {line}")]
    MalformedLine {
        /// Why the line was rejected
        reason: String,
        /// The offending line
        line: String,
    },

    /// A protocol command with an unparseable body
    #[error("Cannot parse command: {line}")]
    MalformedCommand { line: String },

    /// A timestamp token that does not parse as ISO-8601
    #[error("Invalid timestamp '{token}'")]
    InvalidTimestamp { token: String },

    /// A JSON payload that does not parse or lacks required fields
    #[error("Invalid JSON payload: {reason}")]
    InvalidJson { reason: String },

    /// A topic configuration that cannot be interpreted
    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::InvalidJson {
            reason: e.to_string(),
        }
    }
}
