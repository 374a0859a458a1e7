//! The contract between pipelines and the agent
//!
//! Transforms hold no shared state except this contract: device and data
//! item resolution, duplicate queries against the latest checkpoint, and
//! the delivery endpoints. The agent implements it; tests substitute
//! lightweight fakes.

use std::sync::Arc;

use agent_types::{
    Asset, AssetCommand, DataItem, Device, Observation, ObservationPtr, SequenceNumber,
};

use crate::entity::{ConnectionStatus, DeviceCommand};

/// Agent-side operations a pipeline depends on.
pub trait PipelineContract: Send + Sync {
    /// Resolve a device by uuid or name.
    fn find_device(&self, key: &str) -> Option<Arc<Device>>;

    /// The source's default device.
    fn default_device(&self) -> Option<Arc<Device>>;

    /// Resolve a data item by id or name, optionally within a device.
    fn find_data_item(&self, device: Option<&str>, key: &str) -> Option<Arc<DataItem>> {
        let device = match device {
            Some(name) => self.find_device(name),
            None => self.default_device(),
        }?;
        device.data_item_by_key(key)
    }

    /// Apply the duplicate rules of the latest checkpoint. Returns the
    /// observation to forward (possibly reduced) or `None` for duplicates.
    fn check_duplicate(&self, observation: &ObservationPtr) -> Option<ObservationPtr>;

    /// Commit an observation. Returns sequence 0 for orphans.
    fn deliver_observation(&self, observation: Observation) -> (SequenceNumber, ObservationPtr);

    fn deliver_asset(&self, asset: Asset);

    fn deliver_asset_command(&self, command: AssetCommand);

    fn deliver_connection_status(&self, source: &str, status: ConnectionStatus);

    fn deliver_command(&self, source: &str, command: DeviceCommand);
}
