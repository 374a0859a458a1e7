//! Sources feed entities into their pipelines
//!
//! A source owns one pipeline and one task; the task serializes all of the
//! source's work, so entities from a single source keep their order through
//! the pipeline.

pub mod mqtt;
pub mod shdr;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// A telemetry source registered with the agent.
#[async_trait]
pub trait Source: Send + Sync {
    /// Stable identity used for data-source binding and status fan-out.
    fn identity(&self) -> &str;

    /// Human-readable name (typically a uri).
    fn name(&self) -> &str;

    /// The loopback source does not count as an external data source.
    fn is_loopback(&self) -> bool {
        false
    }

    /// Spawn the source's task. Returns once the task is running.
    async fn start(self: Arc<Self>) -> Result<()>;

    /// Stop the task and cancel pending pipeline timers. No handler runs
    /// after this returns.
    async fn stop(&self);
}

/// A stable short identity derived from host and port, matching the id
/// format adapters report on the agent device.
pub fn source_identity(host: &str, port: u16) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    format!("_{}_{}", host, port).hash(&mut hasher);
    format!("_{:010x}", hasher.finish() & 0xff_ffff_ffff)
}
