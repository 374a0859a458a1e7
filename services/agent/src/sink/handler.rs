//! Request handling shared by the REST and WebSocket sinks
//!
//! Both sinks coerce their parameters, then dispatch here; responses are
//! rendered documents from the configured printer.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use agent_buffer::{AssetQuery, Checkpoint, FilterSet};
use agent_pipeline::PipelineContract;
use agent_types::entity::{Properties, Value, VALUE_KEY};
use agent_types::{Asset, ObservationPtr};

use crate::agent::Agent;
use crate::error::RestError;
use crate::filter::PathFilter;
use crate::sink::printer::{DocumentMeta, Printer};

/// Dispatches validated requests against the agent.
pub struct RequestHandler {
    agent: Arc<Agent>,
    printer: Arc<dyn Printer>,
}

impl RequestHandler {
    pub fn new(agent: Arc<Agent>, printer: Arc<dyn Printer>) -> Self {
        Self { agent, printer }
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn printer(&self) -> &Arc<dyn Printer> {
        &self.printer
    }

    pub fn meta(&self) -> DocumentMeta {
        let guard = self.agent.buffer().lock();
        DocumentMeta {
            instance_id: self.agent.instance_id(),
            buffer_size: guard.capacity(),
            first_sequence: guard.first_sequence(),
            next_sequence: guard.next_sequence(),
        }
    }

    pub fn render_error(&self, error: &RestError) -> String {
        self.printer
            .print_error(&self.meta(), error.kind(), &error.to_string())
    }

    /// Resolve the device and path parameters to a filter set. `None`
    /// means unfiltered.
    pub fn resolve_filter(
        &self,
        device: Option<&str>,
        path: Option<&str>,
    ) -> Result<Option<FilterSet>, RestError> {
        let devices = match device {
            Some(key) => {
                let device =
                    self.agent
                        .find_device_by_key(key)
                        .ok_or_else(|| RestError::NotFound {
                            message: format!("device '{}'", key),
                        })?;
                vec![device]
            }
            None => self.agent.devices(),
        };

        match path {
            Some(path) => {
                let filter = PathFilter::parse(path).map_err(|reason| {
                    RestError::InvalidParameterValue {
                        errors: vec![format!("'path': {}", reason)],
                    }
                })?;
                Ok(Some(filter.filter_ids(&devices)))
            }
            None if device.is_some() => Ok(Some(
                devices
                    .iter()
                    .flat_map(|d| d.data_items())
                    .map(|i| i.id().to_string())
                    .collect(),
            )),
            None => Ok(None),
        }
    }

    pub fn probe(&self, device: Option<&str>) -> Result<String, RestError> {
        let devices = match device {
            Some(key) => vec![self
                .agent
                .find_device_by_key(key)
                .ok_or_else(|| RestError::NotFound {
                    message: format!("device '{}'", key),
                })?],
            None => self.agent.devices(),
        };
        Ok(self.printer.print_probe(&self.meta(), &devices))
    }

    pub fn current(
        &self,
        device: Option<&str>,
        path: Option<&str>,
        at: Option<u64>,
    ) -> Result<String, RestError> {
        let filter = self.resolve_filter(device, path)?;
        let guard = self.agent.buffer().lock();
        let meta = DocumentMeta {
            instance_id: self.agent.instance_id(),
            buffer_size: guard.capacity(),
            first_sequence: guard.first_sequence(),
            next_sequence: guard.next_sequence(),
        };

        let checkpoint = match at {
            Some(at) => guard
                .checkpoint_at(at, filter)
                .ok_or_else(|| RestError::OutOfRange {
                    message: format!(
                        "'at' must be between {} and {}",
                        meta.first_sequence,
                        meta.next_sequence.saturating_sub(1)
                    ),
                })?,
            None => Checkpoint::filtered_copy(guard.latest(), filter),
        };

        let mut observations = checkpoint.observations(None);
        observations.sort_by_key(|o| o.sequence());
        Ok(self.printer.print_observations(&meta, &observations))
    }

    /// A historical range query; also returns the continuation sequence
    /// for long-polls.
    pub fn sample(
        &self,
        device: Option<&str>,
        path: Option<&str>,
        from: Option<u64>,
        to: Option<u64>,
        count: i64,
    ) -> Result<(String, u64, bool), RestError> {
        let filter = self.resolve_filter(device, path)?;
        let guard = self.agent.buffer().lock();
        let meta = DocumentMeta {
            instance_id: self.agent.instance_id(),
            buffer_size: guard.capacity(),
            first_sequence: guard.first_sequence(),
            next_sequence: guard.next_sequence(),
        };

        if count == 0 || count.unsigned_abs() as usize > meta.buffer_size {
            return Err(RestError::InvalidParameterValue {
                errors: vec![format!(
                    "'count' must be non-zero and at most {}",
                    meta.buffer_size
                )],
            });
        }
        if let Some(from) = from {
            if from < meta.first_sequence || from > meta.next_sequence {
                return Err(RestError::OutOfRange {
                    message: format!(
                        "'from' must be between {} and {}",
                        meta.first_sequence, meta.next_sequence
                    ),
                });
            }
        }

        let range = guard.observations(count, filter.as_ref(), from, to);
        let document = self.printer.print_observations(&meta, &range.observations);
        Ok((document, range.end_sequence, range.end_of_buffer))
    }

    pub fn assets(
        &self,
        device: Option<&str>,
        asset_type: Option<&str>,
        removed: bool,
        count: usize,
    ) -> Result<String, RestError> {
        let device_uuid = match device {
            Some(key) => Some(
                self.agent
                    .find_device_by_key(key)
                    .map(|d| d.uuid().to_string())
                    .unwrap_or_else(|| key.to_string()),
            ),
            None => None,
        };
        let assets = self.agent.asset_storage().list(&AssetQuery {
            device_uuid,
            asset_type: asset_type.map(str::to_string),
            removed,
            count: Some(count),
        });
        Ok(self.printer.print_assets(&self.meta(), &assets))
    }

    pub fn asset(&self, asset_id: &str) -> Result<String, RestError> {
        let asset = self
            .agent
            .asset_storage()
            .get(asset_id)
            .ok_or_else(|| RestError::NotFound {
                message: format!("asset '{}'", asset_id),
            })?;
        Ok(self.printer.print_assets(&self.meta(), &[asset]))
    }

    /// PUT observation values onto a device's data items.
    pub fn put_observations(
        &self,
        device: &str,
        values: &[(String, String)],
    ) -> Result<String, RestError> {
        let device = self
            .agent
            .find_device_by_key(device)
            .ok_or_else(|| RestError::NotFound {
                message: format!("device '{}'", device),
            })?;

        let mut errors = Vec::new();
        for (key, value) in values {
            match device.data_item_by_key(key) {
                Some(item) => {
                    let mut props = Properties::new();
                    props.insert(VALUE_KEY.to_string(), Value::String(value.clone()));
                    self.agent.receive_data_item(&item, props);
                }
                None => errors.push(format!("data item '{}' not found", key)),
            }
        }
        if !errors.is_empty() {
            return Err(RestError::InvalidParameterValue { errors });
        }
        debug!(device = device.uuid(), count = values.len(), "put observations");
        Ok(r#"{"success":true}"#.to_string())
    }

    pub fn put_asset(
        &self,
        asset_id: &str,
        asset_type: Option<&str>,
        device: Option<&str>,
        body: String,
    ) -> Result<String, RestError> {
        let mut asset = Asset::new(
            asset_id,
            asset_type.unwrap_or("Unknown"),
            Utc::now(),
            body,
        );
        if let Some(device) = device {
            let device =
                self.agent
                    .find_device_by_key(device)
                    .ok_or_else(|| RestError::NotFound {
                        message: format!("device '{}'", device),
                    })?;
            asset.set_device_uuid(device.uuid());
        }
        self.agent.deliver_asset(asset);
        self.asset(asset_id)
    }

    pub fn delete_asset(&self, asset_id: &str) -> Result<String, RestError> {
        let document = self.asset(asset_id)?;
        if !self.agent.remove_asset(asset_id) {
            return Err(RestError::NotFound {
                message: format!("asset '{}'", asset_id),
            });
        }
        Ok(document)
    }

    pub fn delete_all_assets(
        &self,
        device: Option<&str>,
        asset_type: Option<&str>,
    ) -> Result<String, RestError> {
        let count = self.agent.remove_all_assets(device, asset_type);
        Ok(format!(r#"{{"success":true,"removed":{}}}"#, count))
    }

    /// Latest committed observations matching a filter, for streaming.
    pub fn observations_from(
        &self,
        filter: Option<&FilterSet>,
        from: u64,
        count: i64,
    ) -> (Vec<ObservationPtr>, u64, DocumentMeta) {
        let guard = self.agent.buffer().lock();
        let meta = DocumentMeta {
            instance_id: self.agent.instance_id(),
            buffer_size: guard.capacity(),
            first_sequence: guard.first_sequence(),
            next_sequence: guard.next_sequence(),
        };
        let range = guard.observations(count, filter, Some(from), None);
        (range.observations, range.end_sequence, meta)
    }
}
