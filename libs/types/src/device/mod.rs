//! Device model: a tree of components rooted at a device
//!
//! Each component carries identity and a list of data items; the device
//! root additionally owns the well-known agent-facing items (availability,
//! asset changed/removed/count). A device's uuid is globally unique across
//! the agent.

mod data_item;
mod units;

pub use data_item::{DataItem, DataItemBuilder, DataItemCategory, DataItemFilter, Representation};
pub use units::UnitConversion;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EntityError, ErrorList, PropertyError};

/// A node in the component tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Component {
    id: String,
    component_type: String,
    name: Option<String>,
    uuid: Option<String>,
    data_items: Vec<Arc<DataItem>>,
    children: Vec<Component>,
}

impl Component {
    pub fn new(id: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            component_type: component_type.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn component_type(&self) -> &str {
        &self.component_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn add_data_item(&mut self, item: DataItem) {
        self.data_items.push(Arc::new(item));
    }

    pub fn add_data_item_arc(&mut self, item: Arc<DataItem>) {
        self.data_items.push(item);
    }

    pub fn add_child(&mut self, child: Component) {
        self.children.push(child);
    }

    pub fn data_items(&self) -> &[Arc<DataItem>] {
        &self.data_items
    }

    pub fn children(&self) -> &[Component] {
        &self.children
    }

    /// Depth-first walk over every data item in the subtree.
    pub fn all_data_items(&self) -> Vec<Arc<DataItem>> {
        let mut out = Vec::new();
        self.collect_items(&mut out);
        out
    }

    fn collect_items(&self, out: &mut Vec<Arc<DataItem>>) {
        out.extend(self.data_items.iter().cloned());
        for child in &self.children {
            child.collect_items(out);
        }
    }
}

/// A device: the root of a component tree with agent-wide identity.
///
/// Attributes carry descriptive metadata settable by protocol commands
/// (manufacturer, serial number, station).
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    uuid: String,
    name: String,
    root: Component,
    attributes: std::collections::BTreeMap<String, String>,
}

impl Device {
    pub fn new(
        uuid: impl Into<String>,
        name: impl Into<String>,
        root: Component,
    ) -> Result<Self, EntityError> {
        let uuid = uuid.into();
        let name = name.into();
        let mut errors = ErrorList::new();
        if uuid.is_empty() {
            errors.push(PropertyError::Missing {
                property: "uuid".to_string(),
            });
        }
        if name.is_empty() {
            errors.push(PropertyError::Missing {
                property: "name".to_string(),
            });
        }
        if !errors.is_empty() {
            return Err(EntityError::Invalid {
                name: "Device".to_string(),
                errors,
            });
        }

        let mut device = Self {
            uuid,
            name,
            root,
            attributes: std::collections::BTreeMap::new(),
        };
        device.bind_data_items();
        Ok(device)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attributes(&self) -> &std::collections::BTreeMap<String, String> {
        &self.attributes
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Component {
        &self.root
    }

    pub fn set_uuid(&mut self, uuid: impl Into<String>) {
        self.uuid = uuid.into();
        self.bind_data_items();
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// All data items in the device tree.
    pub fn data_items(&self) -> Vec<Arc<DataItem>> {
        self.root.all_data_items()
    }

    /// Index of data items by id.
    pub fn data_item_map(&self) -> HashMap<String, Arc<DataItem>> {
        self.data_items()
            .into_iter()
            .map(|di| (di.id().to_string(), di))
            .collect()
    }

    pub fn data_item(&self, id: &str) -> Option<Arc<DataItem>> {
        self.data_items().into_iter().find(|di| di.id() == id)
    }

    /// Look a data item up by id or by name, the way adapter keys resolve.
    pub fn data_item_by_key(&self, key: &str) -> Option<Arc<DataItem>> {
        let items = self.data_items();
        items
            .iter()
            .find(|di| di.id() == key)
            .or_else(|| items.iter().find(|di| di.name() == Some(key)))
            .cloned()
    }

    pub fn availability(&self) -> Option<Arc<DataItem>> {
        self.find_item(|di| di.is_availability())
    }

    pub fn asset_changed(&self) -> Option<Arc<DataItem>> {
        self.find_item(|di| di.is_asset_changed())
    }

    pub fn asset_removed(&self) -> Option<Arc<DataItem>> {
        self.find_item(|di| di.is_asset_removed())
    }

    pub fn asset_count(&self) -> Option<Arc<DataItem>> {
        self.find_item(|di| di.is_asset_count())
    }

    /// Attach a pre-existing data item to the device root, preserving its
    /// shared handle. Used when a model update must keep the previous
    /// availability/asset items alive.
    pub fn adopt_data_item(&mut self, item: Arc<DataItem>) {
        self.root.data_items.push(item);
    }

    fn find_item(&self, pred: impl Fn(&DataItem) -> bool) -> Option<Arc<DataItem>> {
        self.data_items().into_iter().find(|di| pred(di))
    }

    /// Stamp the device uuid into every data item in the tree.
    fn bind_data_items(&mut self) {
        let uuid = self.uuid.clone();
        bind_component(&mut self.root, &uuid);
    }
}

fn bind_component(component: &mut Component, uuid: &str) {
    for item in &mut component.data_items {
        if item.device_uuid() != Some(uuid) {
            let mut updated = (**item).clone();
            updated.set_device_uuid(uuid);
            *item = Arc::new(updated);
        }
    }
    for child in &mut component.children {
        bind_component(child, uuid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device() -> Device {
        let mut axes = Component::new("ax", "Axes");
        axes.add_data_item(
            DataItem::builder("x1", DataItemCategory::Sample)
                .name("Xpos")
                .item_type("POSITION")
                .units("MILLIMETER")
                .build()
                .unwrap(),
        );

        let mut root = Component::new("dev", "Device").with_name("mill-1");
        root.add_data_item(
            DataItem::builder("avail", DataItemCategory::Event)
                .item_type("AVAILABILITY")
                .build()
                .unwrap(),
        );
        root.add_child(axes);
        Device::new("uuid-1", "mill-1", root).unwrap()
    }

    #[test]
    fn collects_items_across_the_tree() {
        let device = sample_device();
        assert_eq!(device.data_items().len(), 2);
        assert!(device.availability().is_some());
        assert_eq!(device.data_item("x1").unwrap().name(), Some("Xpos"));
    }

    #[test]
    fn items_resolve_by_id_or_name() {
        let device = sample_device();
        assert_eq!(device.data_item_by_key("x1").unwrap().id(), "x1");
        assert_eq!(device.data_item_by_key("Xpos").unwrap().id(), "x1");
        assert!(device.data_item_by_key("nope").is_none());
    }

    #[test]
    fn data_items_carry_the_device_uuid() {
        let device = sample_device();
        assert_eq!(
            device.data_item("x1").unwrap().device_uuid(),
            Some("uuid-1")
        );
    }

    #[test]
    fn empty_uuid_is_rejected() {
        let root = Component::new("dev", "Device");
        assert!(Device::new("", "name", root).is_err());
    }
}
