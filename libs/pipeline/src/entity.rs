//! The tagged entities flowing through a pipeline
//!
//! A tagged enum keeps guard evaluation O(1): every transform declares
//! which variants it accepts and the dispatcher picks the first accepting
//! successor.

use chrono::{DateTime, Utc};

use agent_types::{Asset, AssetCommand, Observation, ObservationPtr};

/// Connection state reported by a source into its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// A protocol command addressed to the agent or a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCommand {
    pub command: String,
    pub value: String,
    /// Device name or uuid; the source's default device when `None`.
    pub device: Option<String>,
}

/// A pipeline entity.
#[derive(Debug, Clone)]
pub enum PipelineEntity {
    /// A raw line from a line-oriented source
    Data { line: String },
    /// A raw broker message
    Message { topic: String, payload: String },
    /// A broker message routed as JSON, with optional device binding
    JsonMessage {
        device: Option<String>,
        payload: String,
    },
    /// A broker message routed as line data, with optional device binding
    DataMessage {
        device: Option<String>,
        line: String,
    },
    /// A tokenized line
    Tokens { tokens: Vec<String> },
    /// Tokens with their extracted timestamp
    TimestampedTokens {
        timestamp: DateTime<Utc>,
        duration: Option<f64>,
        tokens: Vec<String>,
        /// Device binding inherited from a routed message
        device: Option<String>,
    },
    /// Mapped observations awaiting filtering and delivery
    Observations(Vec<Observation>),
    /// Mapped assets awaiting delivery
    Assets(Vec<Asset>),
    /// An asset mutation
    AssetCommand(AssetCommand),
    /// A source connection transition
    ConnectionStatus(ConnectionStatus),
    /// A protocol command
    Command(DeviceCommand),
    /// Observations committed to the buffer; the terminal entity
    Committed(Vec<ObservationPtr>),
}

impl PipelineEntity {
    /// A short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEntity::Data { .. } => "Data",
            PipelineEntity::Message { .. } => "Message",
            PipelineEntity::JsonMessage { .. } => "JsonMessage",
            PipelineEntity::DataMessage { .. } => "DataMessage",
            PipelineEntity::Tokens { .. } => "Tokens",
            PipelineEntity::TimestampedTokens { .. } => "TimestampedTokens",
            PipelineEntity::Observations(_) => "Observations",
            PipelineEntity::Assets(_) => "Assets",
            PipelineEntity::AssetCommand(_) => "AssetCommand",
            PipelineEntity::ConnectionStatus(_) => "ConnectionStatus",
            PipelineEntity::Command(_) => "Command",
            PipelineEntity::Committed(_) => "Committed",
        }
    }
}
