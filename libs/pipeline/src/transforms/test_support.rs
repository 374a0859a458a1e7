//! Shared fakes for transform tests

use std::sync::Arc;

use parking_lot::Mutex;

use agent_buffer::{Checkpoint, CircularBuffer};
use agent_types::device::{Component, DataItem, DataItemCategory, Representation};
use agent_types::{Asset, AssetCommand, Device, Observation, ObservationPtr, SequenceNumber};

use crate::contract::PipelineContract;
use crate::entity::{ConnectionStatus, DeviceCommand};

/// A contract backed by a real buffer and a one-device model.
pub(crate) struct TestContract {
    pub device: Arc<Device>,
    pub buffer: CircularBuffer,
    pub assets: Mutex<Vec<Asset>>,
    pub asset_commands: Mutex<Vec<AssetCommand>>,
    pub statuses: Mutex<Vec<(String, ConnectionStatus)>>,
    pub commands: Mutex<Vec<(String, DeviceCommand)>>,
}

impl TestContract {
    pub fn new() -> Self {
        let mut root = Component::new("dev", "Device").with_name("mill-1");
        root.add_data_item(
            DataItem::builder("X", DataItemCategory::Sample)
                .item_type("POSITION")
                .units("MILLIMETER")
                .native_units("FOOT")
                .build()
                .unwrap(),
        );
        root.add_data_item(
            DataItem::builder("load", DataItemCategory::Sample)
                .item_type("LOAD")
                .minimum_delta(0.5)
                .build()
                .unwrap(),
        );
        root.add_data_item(
            DataItem::builder("temp", DataItemCategory::Sample)
                .item_type("TEMPERATURE")
                .period(10.0)
                .build()
                .unwrap(),
        );
        root.add_data_item(
            DataItem::builder("C", DataItemCategory::Condition)
                .item_type("SYSTEM")
                .build()
                .unwrap(),
        );
        root.add_data_item(
            DataItem::builder("mode", DataItemCategory::Event)
                .item_type("CONTROLLER_MODE")
                .build()
                .unwrap(),
        );
        root.add_data_item(
            DataItem::builder("vars", DataItemCategory::Event)
                .item_type("VARIABLE")
                .representation(Representation::DataSet)
                .build()
                .unwrap(),
        );
        Self {
            device: Arc::new(Device::new("uuid-1", "mill-1", root).unwrap()),
            buffer: CircularBuffer::new(8, 16),
            assets: Mutex::new(Vec::new()),
            asset_commands: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn latest(&self) -> Checkpoint {
        Checkpoint::filtered_copy(self.buffer.lock().latest(), None)
    }
}

impl PipelineContract for TestContract {
    fn find_device(&self, key: &str) -> Option<Arc<Device>> {
        (key == "mill-1" || key == "uuid-1").then(|| self.device.clone())
    }

    fn default_device(&self) -> Option<Arc<Device>> {
        Some(self.device.clone())
    }

    fn check_duplicate(&self, observation: &ObservationPtr) -> Option<ObservationPtr> {
        self.buffer.check_duplicate(observation)
    }

    fn deliver_observation(&self, observation: Observation) -> (SequenceNumber, ObservationPtr) {
        self.buffer.add(observation)
    }

    fn deliver_asset(&self, asset: Asset) {
        self.assets.lock().push(asset);
    }

    fn deliver_asset_command(&self, command: AssetCommand) {
        self.asset_commands.lock().push(command);
    }

    fn deliver_connection_status(&self, source: &str, status: ConnectionStatus) {
        self.statuses.lock().push((source.to_string(), status));
    }

    fn deliver_command(&self, source: &str, command: DeviceCommand) {
        self.commands.lock().push((source.to_string(), command));
    }
}
