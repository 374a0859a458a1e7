//! # Agent Service
//!
//! The coordinator and its edges: device registry and routing, SHDR and
//! MQTT adapters, the REST and WebSocket sinks, lifecycle hooks and
//! configuration.
//!
//! Data flows source → pipeline → agent → buffer/assets → sinks →
//! clients. Control flow is strictly forward; connection status and
//! protocol commands re-enter through the pipelines as typed entities.

pub mod agent;
pub mod agent_device;
pub mod config;
pub mod device_reader;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod sink;
pub mod source;

pub use agent::{Agent, AgentSettings, SourceBinding};
pub use config::AgentConfig;
pub use error::{AgentError, RestError, Result};
pub use filter::PathFilter;
pub use hooks::HookManager;
