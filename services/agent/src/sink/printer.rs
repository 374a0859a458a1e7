//! Document rendering seam
//!
//! MTConnect schema serialization is an external collaborator: sinks hand
//! devices, observations and assets to a [`Printer`] and serve whatever
//! it renders. The in-repo [`JsonPrinter`] produces the agent's JSON
//! envelope; an XML printer plugs in behind the same trait and is
//! selected by the Accept header.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::json;

use agent_types::{Asset, Device, ObservationPtr, ObservationValue};

/// Header fields common to every rendered document.
#[derive(Debug, Clone, Copy)]
pub struct DocumentMeta {
    pub instance_id: u64,
    pub buffer_size: usize,
    pub first_sequence: u64,
    pub next_sequence: u64,
}

/// Renders response documents for one media type.
pub trait Printer: Send + Sync {
    fn mime(&self) -> &'static str;

    fn print_probe(&self, meta: &DocumentMeta, devices: &[Arc<Device>]) -> String;

    fn print_observations(&self, meta: &DocumentMeta, observations: &[ObservationPtr]) -> String;

    fn print_assets(&self, meta: &DocumentMeta, assets: &[Arc<Asset>]) -> String;

    fn print_error(&self, meta: &DocumentMeta, kind: &str, message: &str) -> String;
}

/// The agent's JSON envelope.
pub struct JsonPrinter;

impl JsonPrinter {
    fn header(&self, meta: &DocumentMeta) -> serde_json::Value {
        json!({
            "instanceId": meta.instance_id,
            "bufferSize": meta.buffer_size,
            "firstSequence": meta.first_sequence,
            "lastSequence": meta.next_sequence.saturating_sub(1),
            "nextSequence": meta.next_sequence,
            "creationTime": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }
}

impl Printer for JsonPrinter {
    fn mime(&self) -> &'static str {
        "application/mtconnect+json"
    }

    fn print_probe(&self, meta: &DocumentMeta, devices: &[Arc<Device>]) -> String {
        let devices: Vec<_> = devices.iter().map(|d| device_json(d)).collect();
        json!({
            "MTConnectDevices": {
                "Header": self.header(meta),
                "Devices": devices,
            }
        })
        .to_string()
    }

    fn print_observations(&self, meta: &DocumentMeta, observations: &[ObservationPtr]) -> String {
        let observations: Vec<_> = observations.iter().map(|o| observation_json(o)).collect();
        json!({
            "MTConnectStreams": {
                "Header": self.header(meta),
                "Streams": observations,
            }
        })
        .to_string()
    }

    fn print_assets(&self, meta: &DocumentMeta, assets: &[Arc<Asset>]) -> String {
        let assets: Vec<_> = assets
            .iter()
            .map(|a| {
                json!({
                    "assetId": a.asset_id(),
                    "assetType": a.asset_type(),
                    "deviceUuid": a.device_uuid(),
                    "timestamp": a.timestamp().to_rfc3339_opts(SecondsFormat::AutoSi, true),
                    "removed": a.is_removed(),
                    "body": a.body(),
                })
            })
            .collect();
        json!({
            "MTConnectAssets": {
                "Header": self.header(meta),
                "Assets": assets,
            }
        })
        .to_string()
    }

    fn print_error(&self, meta: &DocumentMeta, kind: &str, message: &str) -> String {
        json!({
            "MTConnectError": {
                "Header": self.header(meta),
                "Errors": [{ "errorCode": kind, "Value": message }],
            }
        })
        .to_string()
    }
}

fn device_json(device: &Device) -> serde_json::Value {
    json!({
        "uuid": device.uuid(),
        "name": device.name(),
        "attributes": device.attributes(),
        "dataItems": device
            .data_items()
            .iter()
            .map(|item| {
                json!({
                    "id": item.id(),
                    "name": item.name(),
                    "type": item.item_type(),
                    "subType": item.sub_type(),
                    "category": format!("{:?}", item.category()).to_uppercase(),
                    "units": item.units(),
                })
            })
            .collect::<Vec<_>>(),
    })
}

fn observation_json(observation: &ObservationPtr) -> serde_json::Value {
    let name = observation
        .data_item()
        .map(|di| di.observation_name())
        .unwrap_or_else(|| "Observation".to_string());
    let mut body = serde_json::Map::new();
    body.insert("dataItemId".into(), observation.data_item_id().into());
    body.insert(
        "timestamp".into(),
        observation
            .timestamp()
            .to_rfc3339_opts(SecondsFormat::AutoSi, true)
            .into(),
    );
    body.insert("sequence".into(), observation.sequence().into());
    body.insert("value".into(), observation.value_text().into());

    if let ObservationValue::Condition(state) = observation.value() {
        body.insert("level".into(), state.level.as_str().into());
        if !state.code.is_empty() {
            body.insert("nativeCode".into(), state.code.clone().into());
        }
        if let Some(qualifier) = &state.qualifier {
            body.insert("qualifier".into(), qualifier.clone().into());
        }
        if let Some(severity) = &state.native_severity {
            body.insert("nativeSeverity".into(), severity.clone().into());
        }
    }

    json!({ name: body })
}
