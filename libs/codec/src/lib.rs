//! # Agent Codec
//!
//! The parsing layer between raw transport bytes and typed entities:
//!
//! - **shdr** — the pipe-delimited line protocol: tokenizing, protocol
//!   command classification, multiline aggregation markers
//! - **timestamp** — ISO-8601 extraction with relative-time anchoring
//! - **topic** — broker topic grammar (`deviceUuid:pattern`) and matching
//! - **json** — JSON observation and asset payloads
//!
//! Nothing in this crate touches sockets; adapters feed it lines and
//! messages and forward the typed results into their pipelines.

pub mod error;
pub mod json;
pub mod shdr;
pub mod timestamp;
pub mod topic;

pub use error::{ProtocolError, Result};
pub use json::JsonPayload;
pub use shdr::ShdrLine;
pub use timestamp::TimestampExtractor;
pub use topic::TopicRoute;
