//! Mapping routed JSON payloads into observations and assets

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use agent_codec::json::{self, JsonPayload};
use agent_types::entity::{Properties, VALUE_KEY};
use agent_types::{Asset, Observation};

use crate::contract::PipelineContract;
use crate::{GuardAction, PipelineEntity, Transform};

/// Parses a JSON payload into observations or an asset.
pub struct JsonMapper {
    contract: Arc<dyn PipelineContract>,
}

impl JsonMapper {
    pub fn new(contract: Arc<dyn PipelineContract>) -> Self {
        Self { contract }
    }
}

impl Transform for JsonMapper {
    fn name(&self) -> &'static str {
        "JsonMapper"
    }

    fn guard(&self, entity: &PipelineEntity) -> GuardAction {
        match entity {
            PipelineEntity::JsonMessage { .. } => GuardAction::Run,
            _ => GuardAction::Skip,
        }
    }

    fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
        let PipelineEntity::JsonMessage { device, payload } = entity else {
            return None;
        };

        let decoded = match json::decode(&payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "dropping malformed JSON payload");
                return None;
            }
        };

        match decoded {
            JsonPayload::Asset(doc) => {
                let mut asset = Asset::new(doc.asset_id, doc.asset_type, Utc::now(), doc.body);
                asset.set_removed(doc.removed);
                if let Some(device) = device.or_else(|| {
                    self.contract
                        .default_device()
                        .map(|d| d.uuid().to_string())
                }) {
                    asset.set_device_uuid(device);
                }
                Some(PipelineEntity::Assets(vec![asset]))
            }
            JsonPayload::Observations(list) => {
                let mut observations = Vec::new();
                for incoming in list {
                    let Some(data_item) =
                        self.contract.find_data_item(device.as_deref(), &incoming.key)
                    else {
                        warn!(key = %incoming.key, "unknown data item in JSON payload");
                        continue;
                    };
                    let mut props = Properties::new();
                    props.insert(VALUE_KEY.to_string(), incoming.value);
                    let timestamp = incoming.timestamp.unwrap_or_else(Utc::now);
                    match Observation::make(&data_item, &props, timestamp) {
                        Ok(obs) => observations.push(obs),
                        Err(e) => {
                            warn!(data_item = data_item.id(), error = %e, "dropping observation");
                        }
                    }
                }
                if observations.is_empty() {
                    None
                } else {
                    Some(PipelineEntity::Observations(observations))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::test_support::TestContract;

    fn mapper() -> JsonMapper {
        JsonMapper::new(Arc::new(TestContract::new()))
    }

    fn json_message(payload: &str) -> PipelineEntity {
        PipelineEntity::JsonMessage {
            device: None,
            payload: payload.into(),
        }
    }

    #[test]
    fn observation_payload_maps_to_the_data_item() {
        let out = mapper()
            .apply(json_message(r#"{"dataItemId":"X","value":1.0}"#))
            .unwrap();
        let PipelineEntity::Observations(obs) = out else {
            panic!("expected observations");
        };
        assert_eq!(obs[0].data_item_id(), "X");
    }

    #[test]
    fn unknown_data_item_is_dropped() {
        // The buffer must stay untouched: the entity never reaches delivery.
        assert!(mapper()
            .apply(json_message(r#"{"dataItemId":"nope","value":1.0}"#))
            .is_none());
    }

    #[test]
    fn asset_payload_maps_to_an_asset() {
        let out = mapper()
            .apply(json_message(r#"{"assetId":"A1","assetType":"CuttingTool"}"#))
            .unwrap();
        let PipelineEntity::Assets(assets) = out else {
            panic!("expected assets");
        };
        assert_eq!(assets[0].asset_id(), "A1");
        assert_eq!(assets[0].device_uuid(), Some("uuid-1"));
    }
}
