//! Device model ingestion
//!
//! The schema-XML parser is an external collaborator behind this seam; the
//! in-repo reader consumes the JSON device form used by tests and sample
//! configurations. Anything that can produce [`agent_types::Device`]
//! values can stand in for it.

use std::path::Path;

use serde::Deserialize;

use agent_types::device::{Component, DataItem, DataItemCategory, Representation};
use agent_types::Device;

use crate::error::{AgentError, Result};

/// One device model document.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceFile {
    pub devices: Vec<DeviceDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceDef {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub data_items: Vec<DataItemDef>,
    #[serde(default)]
    pub components: Vec<ComponentDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentDef {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data_items: Vec<DataItemDef>,
    #[serde(default)]
    pub components: Vec<ComponentDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataItemDef {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub category: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub representation: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub native_units: Option<String>,
    #[serde(default)]
    pub native_scale: Option<f64>,
    #[serde(default)]
    pub statistic: Option<String>,
    #[serde(default)]
    pub constant_value: Option<String>,
    #[serde(default)]
    pub discrete: bool,
    #[serde(default)]
    pub minimum_delta: Option<f64>,
    #[serde(default)]
    pub period: Option<f64>,
    #[serde(default)]
    pub data_source: Option<String>,
}

/// Read every device from a device file.
pub fn read_devices(path: &Path) -> Result<Vec<Device>> {
    let text = std::fs::read_to_string(path).map_err(|source| AgentError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_devices(&text)
        .map_err(|e| AgentError::Configuration(format!("{}: {}", path.display(), e)))
}

/// Parse the JSON device form.
pub fn parse_devices(text: &str) -> std::result::Result<Vec<Device>, String> {
    let file: DeviceFile = serde_json::from_str(text).map_err(|e| e.to_string())?;
    file.devices.into_iter().map(build_device).collect()
}

fn build_device(def: DeviceDef) -> std::result::Result<Device, String> {
    let mut root = Component::new(format!("d_{}", def.uuid), "Device");
    root = root.with_name(def.name.clone());
    for item in def.data_items {
        root.add_data_item(build_data_item(item)?);
    }
    for child in def.components {
        root.add_child(build_component(child)?);
    }
    Device::new(def.uuid, def.name, root).map_err(|e| e.to_string())
}

fn build_component(def: ComponentDef) -> std::result::Result<Component, String> {
    let mut component = Component::new(def.id, def.component_type);
    if let Some(name) = def.name {
        component = component.with_name(name);
    }
    for item in def.data_items {
        component.add_data_item(build_data_item(item)?);
    }
    for child in def.components {
        component.add_child(build_component(child)?);
    }
    Ok(component)
}

fn build_data_item(def: DataItemDef) -> std::result::Result<DataItem, String> {
    let category = DataItemCategory::parse(&def.category)
        .ok_or_else(|| format!("unknown category '{}' on '{}'", def.category, def.id))?;

    let mut builder = DataItem::builder(&def.id, category).item_type(&def.item_type);
    if let Some(name) = def.name {
        builder = builder.name(name);
    }
    if let Some(sub_type) = def.sub_type {
        builder = builder.sub_type(sub_type);
    }
    if let Some(representation) = def.representation {
        let representation = Representation::parse(&representation)
            .ok_or_else(|| format!("unknown representation '{}' on '{}'", representation, def.id))?;
        builder = builder.representation(representation);
    }
    if let Some(units) = def.units {
        builder = builder.units(units);
    }
    if let Some(native_units) = def.native_units {
        builder = builder.native_units(native_units);
    }
    if let Some(scale) = def.native_scale {
        builder = builder.native_scale(scale);
    }
    if let Some(statistic) = def.statistic {
        builder = builder.statistic(statistic);
    }
    if let Some(constant) = def.constant_value {
        builder = builder.constant_value(constant);
    }
    if let Some(delta) = def.minimum_delta {
        builder = builder.minimum_delta(delta);
    }
    if let Some(period) = def.period {
        builder = builder.period(period);
    }
    if let Some(source) = def.data_source {
        builder = builder.data_source(source);
    }
    builder
        .discrete(def.discrete)
        .build()
        .map_err(|e| e.to_string())
}

/// Write the current model back in the JSON device form.
pub fn write_devices(path: &Path, devices: &[std::sync::Arc<Device>]) -> Result<()> {
    let doc = serde_json::json!({
        "devices": devices.iter().map(|d| device_to_json(d)).collect::<Vec<_>>(),
    });
    let text = serde_json::to_string_pretty(&doc)
        .map_err(|e| AgentError::Configuration(e.to_string()))?;
    std::fs::write(path, text).map_err(|source| AgentError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn device_to_json(device: &Device) -> serde_json::Value {
    let root = device.root();
    serde_json::json!({
        "uuid": device.uuid(),
        "name": device.name(),
        "data_items": root.data_items().iter().map(|i| item_to_json(i)).collect::<Vec<_>>(),
        "components": root.children().iter().map(component_to_json).collect::<Vec<_>>(),
    })
}

fn component_to_json(component: &Component) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert("id".into(), component.id().into());
    obj.insert("type".into(), component.component_type().into());
    if let Some(name) = component.name() {
        obj.insert("name".into(), name.into());
    }
    if !component.data_items().is_empty() {
        obj.insert(
            "data_items".into(),
            component
                .data_items()
                .iter()
                .map(|i| item_to_json(i))
                .collect::<Vec<_>>()
                .into(),
        );
    }
    if !component.children().is_empty() {
        obj.insert(
            "components".into(),
            component
                .children()
                .iter()
                .map(component_to_json)
                .collect::<Vec<_>>()
                .into(),
        );
    }
    serde_json::Value::Object(obj)
}

fn item_to_json(item: &DataItem) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert("id".into(), item.id().into());
    obj.insert("type".into(), item.item_type().into());
    let category = match item.category() {
        DataItemCategory::Sample => "SAMPLE",
        DataItemCategory::Event => "EVENT",
        DataItemCategory::Condition => "CONDITION",
    };
    obj.insert("category".into(), category.into());
    if let Some(name) = item.name() {
        obj.insert("name".into(), name.into());
    }
    if let Some(sub_type) = item.sub_type() {
        obj.insert("sub_type".into(), sub_type.into());
    }
    if let Some(units) = item.units() {
        obj.insert("units".into(), units.into());
    }
    if let Some(native) = item.native_units() {
        obj.insert("native_units".into(), native.into());
    }
    if let Some(constant) = item.constant_value() {
        obj.insert("constant_value".into(), constant.into());
    }
    if item.is_discrete() {
        obj.insert("discrete".into(), true.into());
    }
    if let Some(delta) = item.filter().minimum_delta {
        obj.insert("minimum_delta".into(), delta.into());
    }
    if let Some(period) = item.filter().period {
        obj.insert("period".into(), period.into());
    }
    if let Some(source) = item.data_source() {
        obj.insert("data_source".into(), source.into());
    }
    serde_json::Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"{
        "devices": [{
            "uuid": "uuid-1",
            "name": "mill-1",
            "data_items": [
                {"id": "avail", "type": "AVAILABILITY", "category": "EVENT"}
            ],
            "components": [{
                "id": "ax", "type": "Axes",
                "components": [{
                    "id": "x", "type": "Linear", "name": "X",
                    "data_items": [
                        {"id": "x1", "type": "POSITION", "category": "SAMPLE",
                         "units": "MILLIMETER", "native_units": "FOOT"}
                    ]
                }]
            }]
        }]
    }"#;

    #[test]
    fn parses_a_nested_model() {
        let devices = parse_devices(MODEL).unwrap();
        assert_eq!(devices.len(), 1);
        let device = &devices[0];
        assert_eq!(device.uuid(), "uuid-1");
        assert!(device.availability().is_some());
        assert_eq!(device.data_item("x1").unwrap().convert(1.0), 304.8);
    }

    #[test]
    fn unknown_category_is_rejected() {
        let text = r#"{"devices": [{"uuid": "u", "name": "n", "data_items": [
            {"id": "a", "type": "X", "category": "BOGUS"}
        ]}]}"#;
        assert!(parse_devices(text).is_err());
    }
}
