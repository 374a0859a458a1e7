//! Mapping timestamped tokens onto device data items

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;

use agent_types::entity::{Properties, Value, VALUE_KEY};
use agent_types::{Asset, AssetCommand, DataItem, DataItemCategory, Observation};

use crate::contract::PipelineContract;
use crate::{GuardAction, PipelineEntity, Transform};

const ASSET_KEY: &str = "@ASSET@";
const UPDATE_ASSET_KEY: &str = "@UPDATE_ASSET@";
const REMOVE_ASSET_KEY: &str = "@REMOVE_ASSET@";
const REMOVE_ALL_ASSETS_KEY: &str = "@REMOVE_ALL_ASSETS@";

/// Maps `(key, value…)` pairs against device data items, emitting
/// observations and assets. Keys may be qualified `device:dataItem`.
pub struct ShdrTokenMapper {
    contract: Arc<dyn PipelineContract>,
    default_device: Option<String>,
    /// Keys already logged as unresolvable, to keep the log quiet.
    unknown_keys: Mutex<HashSet<String>>,
}

impl ShdrTokenMapper {
    pub fn new(contract: Arc<dyn PipelineContract>, default_device: Option<String>) -> Self {
        Self {
            contract,
            default_device,
            unknown_keys: Mutex::new(HashSet::new()),
        }
    }

    /// Map a token list with an already-extracted timestamp; shared with
    /// the broker data mapper.
    pub fn map_tokens(
        &self,
        timestamp: DateTime<Utc>,
        duration: Option<f64>,
        tokens: &[String],
        device: Option<&str>,
    ) -> Option<PipelineEntity> {
        if let Some(first) = tokens.first() {
            if first.starts_with('@') {
                return self.map_asset(timestamp, tokens, device);
            }
        }

        let mut observations = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let key = &tokens[i];
            i += 1;
            if key.is_empty() {
                continue;
            }

            let (device_key, item_key) = match key.split_once(':') {
                Some((dev, item)) => (Some(dev), item),
                None => (device.or(self.default_device.as_deref()), key.as_str()),
            };

            let Some(data_item) = self.contract.find_data_item(device_key, item_key) else {
                self.warn_unknown(key);
                i += 1; // skip the value token and resynchronize
                continue;
            };

            let consumed = value_tokens(&data_item);
            let values = &tokens[i.min(tokens.len())..(i + consumed).min(tokens.len())];
            i += consumed;

            match build_properties(&data_item, values, duration) {
                Some(props) => match Observation::make(&data_item, &props, timestamp) {
                    Ok(obs) => observations.push(obs),
                    Err(e) => {
                        warn!(data_item = data_item.id(), error = %e, "dropping observation");
                    }
                },
                None => {
                    warn!(data_item = data_item.id(), "too few values for data item");
                }
            }
        }

        if observations.is_empty() {
            None
        } else {
            Some(PipelineEntity::Observations(observations))
        }
    }

    fn map_asset(
        &self,
        timestamp: DateTime<Utc>,
        tokens: &[String],
        device: Option<&str>,
    ) -> Option<PipelineEntity> {
        let key = tokens[0].as_str();
        let device = device
            .map(str::to_string)
            .or_else(|| self.default_device.clone())
            .or_else(|| {
                self.contract
                    .default_device()
                    .map(|d| d.uuid().to_string())
            });

        match key {
            ASSET_KEY | UPDATE_ASSET_KEY => {
                if tokens.len() < 4 {
                    warn!("asset record requires id, type and body");
                    return None;
                }
                let body = tokens[3..].join("|");
                let mut asset = Asset::new(&tokens[1], &tokens[2], timestamp, body);
                if let Some(device) = device {
                    asset.set_device_uuid(device);
                }
                Some(PipelineEntity::Assets(vec![asset]))
            }
            REMOVE_ASSET_KEY => {
                let asset_id = tokens.get(1).filter(|t| !t.is_empty())?;
                Some(PipelineEntity::AssetCommand(AssetCommand::RemoveAsset {
                    asset_id: asset_id.clone(),
                }))
            }
            REMOVE_ALL_ASSETS_KEY => Some(PipelineEntity::AssetCommand(AssetCommand::RemoveAll {
                asset_type: tokens.get(1).filter(|t| !t.is_empty()).cloned(),
                device,
            })),
            _ => {
                warn!(key, "unrecognized asset record");
                None
            }
        }
    }

    fn warn_unknown(&self, key: &str) {
        let mut seen = self.unknown_keys.lock();
        if seen.insert(key.to_string()) {
            warn!(key, "could not find data item for key");
        }
    }
}

impl Transform for ShdrTokenMapper {
    fn name(&self) -> &'static str {
        "ShdrTokenMapper"
    }

    fn guard(&self, entity: &PipelineEntity) -> GuardAction {
        match entity {
            PipelineEntity::TimestampedTokens { .. } => GuardAction::Run,
            _ => GuardAction::Skip,
        }
    }

    fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
        let PipelineEntity::TimestampedTokens {
            timestamp,
            duration,
            tokens,
            device,
        } = entity
        else {
            return None;
        };
        self.map_tokens(timestamp, duration, &tokens, device.as_deref())
    }
}

/// How many value tokens an observation of this data item consumes.
fn value_tokens(data_item: &DataItem) -> usize {
    match data_item.category() {
        DataItemCategory::Condition => 5,
        DataItemCategory::Sample if data_item.is_time_series() => 3,
        DataItemCategory::Event => match data_item.item_type() {
            "MESSAGE" => 2,
            "ALARM" => 5,
            _ => 1,
        },
        _ => 1,
    }
}

fn build_properties(
    data_item: &DataItem,
    values: &[String],
    duration: Option<f64>,
) -> Option<Properties> {
    let mut props = Properties::new();
    let get = |n: usize| values.get(n).map(String::as_str).unwrap_or("");
    let put = |props: &mut Properties, key: &str, n: usize| {
        let v = get(n);
        if !v.is_empty() {
            props.insert(key.to_string(), Value::String(v.to_string()));
        }
    };

    match data_item.category() {
        DataItemCategory::Condition => {
            if values.is_empty() {
                return None;
            }
            props.insert("level".to_string(), Value::String(get(0).to_string()));
            put(&mut props, "nativeCode", 1);
            put(&mut props, "nativeSeverity", 2);
            put(&mut props, "qualifier", 3);
            put(&mut props, VALUE_KEY, 4);
        }
        DataItemCategory::Sample if data_item.is_time_series() => {
            if values.len() < 3 {
                return None;
            }
            props.insert("sampleCount".to_string(), Value::String(get(0).to_string()));
            if !get(1).is_empty() {
                props.insert("sampleRate".to_string(), Value::String(get(1).to_string()));
            }
            props.insert(VALUE_KEY.to_string(), Value::String(get(2).to_string()));
        }
        DataItemCategory::Event if data_item.item_type() == "MESSAGE" => {
            put(&mut props, "nativeCode", 0);
            props.insert(VALUE_KEY.to_string(), Value::String(get(1).to_string()));
        }
        DataItemCategory::Event if data_item.item_type() == "ALARM" => {
            put(&mut props, "code", 0);
            put(&mut props, "nativeCode", 1);
            put(&mut props, "severity", 2);
            put(&mut props, "state", 3);
            props.insert(VALUE_KEY.to_string(), Value::String(get(4).to_string()));
        }
        _ => {
            if values.is_empty() {
                return None;
            }
            let raw = get(0);
            // Data-set values may carry a leading reset trigger.
            if data_item.is_data_set() {
                if let Some(rest) = raw.strip_prefix(':') {
                    let (trigger, set_text) =
                        rest.split_once(' ').unwrap_or((rest, ""));
                    props.insert(
                        "resetTriggered".to_string(),
                        Value::String(trigger.to_string()),
                    );
                    props.insert(VALUE_KEY.to_string(), Value::String(set_text.to_string()));
                } else {
                    props.insert(VALUE_KEY.to_string(), Value::String(raw.to_string()));
                }
            } else {
                props.insert(VALUE_KEY.to_string(), Value::String(raw.to_string()));
            }
            if let Some(duration) = duration {
                if data_item.is_sample() {
                    props.insert("duration".to_string(), Value::Double(duration));
                }
            }
        }
    }
    Some(props)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::test_support::TestContract;
    use agent_types::{ConditionLevel, ObservationValue};

    fn mapper() -> ShdrTokenMapper {
        ShdrTokenMapper::new(Arc::new(TestContract::new()), None)
    }

    fn tokens(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn maps_sample_pairs() {
        let out = mapper()
            .map_tokens(Utc::now(), None, &tokens(&["X", "1.5", "mode", "AUTO"]), None)
            .unwrap();
        let PipelineEntity::Observations(obs) = out else {
            panic!("expected observations");
        };
        assert_eq!(obs.len(), 2);
        assert_eq!(
            obs[0].value(),
            &ObservationValue::Sample {
                value: Some(1.5),
                duration: None,
                statistic: None
            }
        );
    }

    #[test]
    fn maps_conditions_with_five_fields() {
        let out = mapper()
            .map_tokens(
                Utc::now(),
                None,
                &tokens(&["C", "FAULT", "A", "1", "HIGH", "overheat"]),
                None,
            )
            .unwrap();
        let PipelineEntity::Observations(obs) = out else {
            panic!("expected observations");
        };
        let cond = obs[0].condition().unwrap();
        assert_eq!(cond.level, ConditionLevel::Fault);
        assert_eq!(cond.code, "A");
        assert_eq!(cond.qualifier.as_deref(), Some("HIGH"));
        assert_eq!(cond.native_severity.as_deref(), Some("1"));
        assert_eq!(cond.text.as_deref(), Some("overheat"));
    }

    #[test]
    fn unknown_keys_are_skipped_with_resync() {
        let out = mapper()
            .map_tokens(
                Utc::now(),
                None,
                &tokens(&["nope", "1", "X", "2"]),
                None,
            )
            .unwrap();
        let PipelineEntity::Observations(obs) = out else {
            panic!("expected observations");
        };
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].data_item_id(), "X");
    }

    #[test]
    fn device_qualified_keys_resolve() {
        let out = mapper()
            .map_tokens(Utc::now(), None, &tokens(&["mill-1:X", "2"]), None)
            .unwrap();
        let PipelineEntity::Observations(obs) = out else {
            panic!("expected observations");
        };
        assert_eq!(obs[0].data_item_id(), "X");
    }

    #[test]
    fn data_set_reset_trigger_is_split() {
        let out = mapper()
            .map_tokens(
                Utc::now(),
                None,
                &tokens(&["vars", ":MANUAL_RESET a=1 b=2"]),
                None,
            )
            .unwrap();
        let PipelineEntity::Observations(obs) = out else {
            panic!("expected observations");
        };
        assert_eq!(obs[0].reset_triggered(), Some("MANUAL_RESET"));
        assert_eq!(obs[0].data_set().unwrap().len(), 2);
    }

    #[test]
    fn asset_records_become_assets() {
        let out = mapper()
            .map_tokens(
                Utc::now(),
                None,
                &tokens(&["@ASSET@", "T1", "CuttingTool", "<CuttingTool/>"]),
                None,
            )
            .unwrap();
        let PipelineEntity::Assets(assets) = out else {
            panic!("expected assets");
        };
        assert_eq!(assets[0].asset_id(), "T1");
        assert_eq!(assets[0].asset_type(), "CuttingTool");
        assert_eq!(assets[0].device_uuid(), Some("uuid-1"));
    }

    #[test]
    fn remove_asset_becomes_a_command() {
        let out = mapper()
            .map_tokens(Utc::now(), None, &tokens(&["@REMOVE_ASSET@", "T1"]), None)
            .unwrap();
        assert!(matches!(
            out,
            PipelineEntity::AssetCommand(AssetCommand::RemoveAsset { ref asset_id }) if asset_id == "T1"
        ));
    }
}
