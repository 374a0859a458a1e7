//! The agent's own device
//!
//! The agent publishes itself as a device carrying device lifecycle events
//! and, per registered adapter, the adapter's uri and connection status.

use agent_types::device::{Component, DataItem, DataItemCategory};
use agent_types::{Device, AVAILABLE};

use crate::error::Result;

/// Connection status values reported on the agent device.
pub const STATUS_LISTENING: &str = "LISTENING";
pub const STATUS_ESTABLISHED: &str = "ESTABLISHED";
pub const STATUS_CLOSED: &str = "CLOSED";

pub fn connection_status_id(identity: &str) -> String {
    format!("{}_connection_status", identity)
}

pub fn adapter_uri_id(identity: &str) -> String {
    format!("{}_adapter_uri", identity)
}

/// Build the agent device with no adapters yet.
pub fn build_agent_device(uuid: &str, name: &str) -> Result<Device> {
    let mut root = Component::new(format!("agent_{}", uuid), "Agent").with_name(name.to_string());
    root.add_data_item(
        DataItem::builder("agent_avail", DataItemCategory::Event)
            .item_type("AVAILABILITY")
            .constant_value(AVAILABLE)
            .build()?,
    );
    root.add_data_item(
        DataItem::builder("device_added", DataItemCategory::Event)
            .item_type("DEVICE_ADDED")
            .discrete(true)
            .build()?,
    );
    root.add_data_item(
        DataItem::builder("device_removed", DataItemCategory::Event)
            .item_type("DEVICE_REMOVED")
            .discrete(true)
            .build()?,
    );
    root.add_data_item(
        DataItem::builder("device_changed", DataItemCategory::Event)
            .item_type("DEVICE_CHANGED")
            .discrete(true)
            .build()?,
    );
    Ok(Device::new(uuid, name, root)?)
}

/// A copy of the agent device with an adapter component appended.
pub fn with_adapter(device: &Device, identity: &str, uri: &str) -> Result<Device> {
    let mut adapter = Component::new(identity.to_string(), "Adapter");
    adapter.add_data_item(
        DataItem::builder(connection_status_id(identity), DataItemCategory::Event)
            .item_type("CONNECTION_STATUS")
            .build()?,
    );
    adapter.add_data_item(
        DataItem::builder(adapter_uri_id(identity), DataItemCategory::Event)
            .item_type("ADAPTER_URI")
            .constant_value(uri)
            .build()?,
    );

    let mut root = device.root().clone();
    root.add_child(adapter);
    let mut updated = Device::new(device.uuid(), device.name(), root)?;
    for (key, value) in device.attributes() {
        updated.set_attribute(key.clone(), value.clone());
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_device_carries_lifecycle_events() {
        let device = build_agent_device("agent-uuid", "Agent").unwrap();
        assert!(device.data_item("device_added").is_some());
        assert!(device.data_item("device_changed").is_some());
        assert_eq!(
            device.availability().unwrap().constant_value(),
            Some(AVAILABLE)
        );
    }

    #[test]
    fn adapters_add_status_items() {
        let device = build_agent_device("agent-uuid", "Agent").unwrap();
        let device = with_adapter(&device, "_a1b2c3", "shdr://localhost:7878").unwrap();
        let status = device.data_item("_a1b2c3_connection_status").unwrap();
        assert_eq!(status.item_type(), "CONNECTION_STATUS");
        let uri = device.data_item("_a1b2c3_adapter_uri").unwrap();
        assert_eq!(uri.constant_value(), Some("shdr://localhost:7878"));
    }
}
