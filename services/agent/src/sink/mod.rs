//! Sinks publish agent state to clients

pub mod handler;
pub mod printer;
pub mod rest;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;

use agent_types::{Asset, ObservationPtr};

use crate::error::Result;

/// A client-facing publisher registered with the agent.
///
/// Streaming delivery is driven by buffer observers; the publish methods
/// exist for sinks that push eagerly and for metrics.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    async fn start(self: Arc<Self>) -> Result<()>;

    async fn stop(&self);

    fn publish_observation(&self, _observation: &ObservationPtr) {}

    fn publish_asset(&self, _asset: &Arc<Asset>) {}
}
