//! Error types for the agent service

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent-level failures.
///
/// `DuplicateDevice`, `Configuration` and `Bind` are fatal at startup: the
/// binary logs them and exits with code 1. Everything else is recovered.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A device with this uuid is already registered
    #[error("Duplicate device uuid '{uuid}'")]
    DuplicateDevice { uuid: String },

    /// The device model or configuration is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A server socket could not be bound
    #[error("Cannot bind {address}: {reason}")]
    Bind { address: String, reason: String },

    /// A referenced device does not exist
    #[error("Device '{key}' not found")]
    DeviceNotFound { key: String },

    /// Entity validation failure from the type layer
    #[error(transparent)]
    Entity(#[from] agent_types::EntityError),

    /// I/O failure reading or writing agent files
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A typed REST failure, mapped onto a status-coded response.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RestError {
    /// A query or path parameter failed coercion; all failures accumulate
    #[error("InvalidParameterValue: {}", errors.join("; "))]
    InvalidParameterValue { errors: Vec<String> },

    /// A sequence parameter is outside the buffer's live range
    #[error("OutOfRange: {message}")]
    OutOfRange { message: String },

    /// The requested device or asset does not exist
    #[error("NotFound: {message}")]
    NotFound { message: String },

    /// Mutations are disabled or the origin is not allow-listed
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// The verb is not supported on this route
    #[error("UnsupportedVerb: {message}")]
    UnsupportedVerb { message: String },

    /// A WebSocket request envelope is malformed
    #[error("InvalidRequest: {message}")]
    InvalidRequest { message: String },
}

impl RestError {
    pub fn status(&self) -> u16 {
        match self {
            RestError::InvalidParameterValue { .. } => 400,
            RestError::OutOfRange { .. } => 404,
            RestError::NotFound { .. } => 404,
            RestError::Unauthorized { .. } => 403,
            RestError::UnsupportedVerb { .. } => 405,
            RestError::InvalidRequest { .. } => 400,
        }
    }

    /// The error kind tag used in rendered documents.
    pub fn kind(&self) -> &'static str {
        match self {
            RestError::InvalidParameterValue { .. } => "INVALID_REQUEST",
            RestError::OutOfRange { .. } => "OUT_OF_RANGE",
            RestError::NotFound { .. } => "NOT_FOUND",
            RestError::Unauthorized { .. } => "UNAUTHORIZED",
            RestError::UnsupportedVerb { .. } => "UNSUPPORTED",
            RestError::InvalidRequest { .. } => "INVALID_REQUEST",
        }
    }
}
