//! Observations: immutable, sequence-numbered values of a data item

pub mod condition;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;

use crate::device::{DataItem, DataItemCategory, Representation};
use crate::entity::{DataSet, Factory, Properties, Requirement, Value, ValueType, VALUE_KEY};
use crate::error::{EntityError, PropertyError};
use crate::{SequenceNumber, UNAVAILABLE};

/// Requirements on the wire properties of a condition.
static CONDITION_FACTORY: Lazy<Factory> = Lazy::new(|| {
    Factory::with_requirements([
        Requirement::new("level", ValueType::String, true)
            .with_pattern("(?i)^(NORMAL|WARNING|FAULT|UNAVAILABLE)$"),
        Requirement::new("nativeCode", ValueType::String, false),
        Requirement::new("nativeSeverity", ValueType::String, false),
        Requirement::new("qualifier", ValueType::String, false),
        Requirement::new(VALUE_KEY, ValueType::String, false),
    ])
});

/// Requirements on the wire properties of a message event.
static MESSAGE_FACTORY: Lazy<Factory> = Lazy::new(|| {
    Factory::with_requirements([
        Requirement::new("nativeCode", ValueType::String, false),
        Requirement::new(VALUE_KEY, ValueType::String, false),
    ])
});

/// Shared handle to a committed observation.
pub type ObservationPtr = Arc<Observation>;

/// Condition severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionLevel {
    Normal,
    Warning,
    Fault,
    Unavailable,
}

impl ConditionLevel {
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_uppercase().as_str() {
            "NORMAL" => Some(Self::Normal),
            "WARNING" => Some(Self::Warning),
            "FAULT" => Some(Self::Fault),
            "UNAVAILABLE" => Some(Self::Unavailable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Warning => "WARNING",
            Self::Fault => "FAULT",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

/// The state of a condition observation, including the forward link to the
/// prior active condition forming the chain.
#[derive(Debug, Clone)]
pub struct ConditionState {
    pub level: ConditionLevel,
    /// Native code; empty when the condition addresses the whole item.
    pub code: String,
    pub qualifier: Option<String>,
    pub native_severity: Option<String>,
    pub text: Option<String>,
    /// Previous active condition with the same data item.
    pub prev: Option<ObservationPtr>,
}

impl PartialEq for ConditionState {
    /// Chain links are excluded; two conditions are equal when their own
    /// fields match.
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level
            && self.code == other.code
            && self.qualifier == other.qualifier
            && self.native_severity == other.native_severity
            && self.text == other.text
    }
}

/// The typed payload of an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationValue {
    Sample {
        value: Option<f64>,
        duration: Option<f64>,
        statistic: Option<String>,
    },
    ThreeSpace {
        value: Option<[f64; 3]>,
    },
    Timeseries {
        count: usize,
        frequency: Option<f64>,
        values: Vec<f64>,
    },
    Event(Value),
    DataSetEvent {
        set: DataSet,
        reset_triggered: Option<String>,
    },
    TableEvent {
        set: DataSet,
        reset_triggered: Option<String>,
    },
    Condition(ConditionState),
    AssetEvent {
        asset_type: Option<String>,
        value: Value,
    },
    Message {
        native_code: Option<String>,
        text: Value,
    },
    Alarm {
        code: Option<String>,
        native_code: Option<String>,
        severity: Option<String>,
        state: Option<String>,
        text: Value,
    },
}

/// An immutable record bound to exactly one data item.
///
/// The sequence number is zero until the circular buffer commits the
/// observation; commit order assigns strictly monotonic sequences.
#[derive(Debug, Clone)]
pub struct Observation {
    data_item: Weak<DataItem>,
    data_item_id: String,
    timestamp: DateTime<Utc>,
    sequence: SequenceNumber,
    unavailable: bool,
    value: ObservationValue,
}

impl Observation {
    pub fn new(
        data_item: &Arc<DataItem>,
        value: ObservationValue,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let unavailable = match &value {
            ObservationValue::Sample { value, .. } => value.is_none(),
            ObservationValue::ThreeSpace { value } => value.is_none(),
            ObservationValue::Timeseries { values, .. } => values.is_empty(),
            ObservationValue::Event(v)
            | ObservationValue::AssetEvent { value: v, .. }
            | ObservationValue::Message { text: v, .. }
            | ObservationValue::Alarm { text: v, .. } => is_unavailable_value(v),
            ObservationValue::DataSetEvent { set, .. }
            | ObservationValue::TableEvent { set, .. } => set.is_empty(),
            ObservationValue::Condition(c) => c.level == ConditionLevel::Unavailable,
        };

        Self {
            data_item: Arc::downgrade(data_item),
            data_item_id: data_item.id().to_string(),
            timestamp,
            sequence: 0,
            unavailable,
            value,
        }
    }

    /// The unavailable observation for a data item, honoring its constant
    /// value when declared.
    pub fn make_unavailable(data_item: &Arc<DataItem>, timestamp: DateTime<Utc>) -> Self {
        match data_item.constant_value() {
            Some(constant) => {
                let mut props = Properties::new();
                props.insert(VALUE_KEY.to_string(), Value::String(constant.to_string()));
                // Constant values are validated at model load.
                Self::make(data_item, &props, timestamp)
                    .unwrap_or_else(|_| Self::unavailable_of(data_item, timestamp))
            }
            None => Self::unavailable_of(data_item, timestamp),
        }
    }

    fn unavailable_of(data_item: &Arc<DataItem>, timestamp: DateTime<Utc>) -> Self {
        let value = match (data_item.category(), data_item.representation()) {
            (DataItemCategory::Condition, _) => ObservationValue::Condition(ConditionState {
                level: ConditionLevel::Unavailable,
                code: String::new(),
                qualifier: None,
                native_severity: None,
                text: None,
                prev: None,
            }),
            (DataItemCategory::Sample, Representation::TimeSeries) => {
                ObservationValue::Timeseries {
                    count: 0,
                    frequency: None,
                    values: Vec::new(),
                }
            }
            (DataItemCategory::Sample, _) if data_item.is_three_space() => {
                ObservationValue::ThreeSpace { value: None }
            }
            (DataItemCategory::Sample, _) => ObservationValue::Sample {
                value: None,
                duration: None,
                statistic: data_item.statistic().map(str::to_string),
            },
            (DataItemCategory::Event, Representation::DataSet) => ObservationValue::DataSetEvent {
                set: DataSet::new(),
                reset_triggered: None,
            },
            (DataItemCategory::Event, Representation::Table) => ObservationValue::TableEvent {
                set: DataSet::new(),
                reset_triggered: None,
            },
            (DataItemCategory::Event, _) => {
                ObservationValue::Event(Value::String(UNAVAILABLE.to_string()))
            }
        };
        Self::new(data_item, value, timestamp)
    }

    /// Build an observation from raw properties, choosing the variant from
    /// the data item's category and representation.
    pub fn make(
        data_item: &Arc<DataItem>,
        properties: &Properties,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, EntityError> {
        let value = build_value(data_item, properties)?;
        Ok(Self::new(data_item, value, timestamp))
    }

    pub fn data_item(&self) -> Option<Arc<DataItem>> {
        self.data_item.upgrade()
    }

    pub fn data_item_id(&self) -> &str {
        &self.data_item_id
    }

    /// An observation is an orphan iff its data item no longer resolves.
    pub fn is_orphan(&self) -> bool {
        self.data_item.upgrade().is_none()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.sequence = sequence;
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    pub fn value(&self) -> &ObservationValue {
        &self.value
    }

    pub fn condition(&self) -> Option<&ConditionState> {
        match &self.value {
            ObservationValue::Condition(c) => Some(c),
            _ => None,
        }
    }

    pub fn data_set(&self) -> Option<&DataSet> {
        match &self.value {
            ObservationValue::DataSetEvent { set, .. }
            | ObservationValue::TableEvent { set, .. } => Some(set),
            _ => None,
        }
    }

    pub fn reset_triggered(&self) -> Option<&str> {
        match &self.value {
            ObservationValue::DataSetEvent {
                reset_triggered, ..
            }
            | ObservationValue::TableEvent {
                reset_triggered, ..
            } => reset_triggered.as_deref(),
            _ => None,
        }
    }

    /// Payload equality ignoring timestamp and sequence.
    pub fn value_eq(&self, other: &Observation) -> bool {
        self.value == other.value
    }

    /// A copy with a replaced payload, keeping identity and timestamp.
    pub fn with_value(&self, value: ObservationValue) -> Self {
        let mut copy = self.clone();
        copy.value = value;
        copy
    }

    /// Re-point at the data item with the same id in `map`, if any.
    ///
    /// Used when a device model is swapped at runtime; observations whose
    /// id vanished stay orphaned.
    pub fn rebind(&self, map: &HashMap<String, Arc<DataItem>>) -> Option<Self> {
        map.get(&self.data_item_id).map(|di| {
            let mut copy = self.clone();
            copy.data_item = Arc::downgrade(di);
            copy
        })
    }

    /// The wire text of the payload, as served to clients.
    pub fn value_text(&self) -> String {
        if self.unavailable && self.condition().is_none() {
            if let ObservationValue::Event(Value::String(s)) = &self.value {
                return s.clone();
            }
            return UNAVAILABLE.to_string();
        }
        match &self.value {
            ObservationValue::Sample { value, .. } => value
                .map(crate::entity::format_double)
                .unwrap_or_else(|| UNAVAILABLE.to_string()),
            ObservationValue::ThreeSpace { value } => value
                .map(|v| {
                    v.iter()
                        .map(|d| crate::entity::format_double(*d))
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_else(|| UNAVAILABLE.to_string()),
            ObservationValue::Timeseries { values, .. } => values
                .iter()
                .map(|d| crate::entity::format_double(*d))
                .collect::<Vec<_>>()
                .join(" "),
            ObservationValue::Event(v)
            | ObservationValue::AssetEvent { value: v, .. }
            | ObservationValue::Message { text: v, .. }
            | ObservationValue::Alarm { text: v, .. } => v.to_text(),
            ObservationValue::DataSetEvent { set, .. }
            | ObservationValue::TableEvent { set, .. } => set.to_text(),
            ObservationValue::Condition(c) => c.text.clone().unwrap_or_default(),
        }
    }
}

fn is_unavailable_value(value: &Value) -> bool {
    matches!(value, Value::String(s) if s == UNAVAILABLE)
}

fn build_value(
    data_item: &Arc<DataItem>,
    properties: &Properties,
) -> Result<ObservationValue, EntityError> {
    let id = data_item.id();
    let raw = properties.get(VALUE_KEY).cloned().unwrap_or(Value::Empty);
    let text = raw.to_text();
    let unavailable = text == UNAVAILABLE;

    let invalid = |e: PropertyError| EntityError::Invalid {
        name: data_item.observation_name(),
        errors: e.into(),
    };

    match data_item.category() {
        DataItemCategory::Condition => {
            let (entity, errors) =
                CONDITION_FACTORY.make(&data_item.observation_name(), properties.clone());
            if !errors.is_empty() {
                return Err(EntityError::Invalid {
                    name: data_item.observation_name(),
                    errors,
                });
            }
            let level = entity
                .get_string("level")
                .and_then(ConditionLevel::parse)
                .ok_or_else(|| EntityError::IncompatibleValue {
                    id: id.to_string(),
                    reason: "condition requires a level".to_string(),
                })?;
            Ok(ObservationValue::Condition(ConditionState {
                level,
                code: entity.get_string("nativeCode").unwrap_or_default().to_string(),
                qualifier: entity.get_string("qualifier").map(str::to_string),
                native_severity: entity.get_string("nativeSeverity").map(str::to_string),
                text: if text.is_empty() { None } else { Some(text) },
                prev: None,
            }))
        }
        DataItemCategory::Sample if data_item.is_time_series() => {
            if unavailable {
                return Ok(ObservationValue::Timeseries {
                    count: 0,
                    frequency: None,
                    values: Vec::new(),
                });
            }
            let values = raw.to_vector(VALUE_KEY).map_err(invalid)?;
            let count = match properties.get("sampleCount") {
                Some(v) => v.to_int("sampleCount").map_err(invalid)? as usize,
                None => values.len(),
            };
            if count != values.len() {
                return Err(EntityError::IncompatibleValue {
                    id: id.to_string(),
                    reason: format!(
                        "time series count {} does not match {} values",
                        count,
                        values.len()
                    ),
                });
            }
            let frequency = match properties.get("sampleRate") {
                Some(v) => Some(v.to_double("sampleRate").map_err(invalid)?).filter(|f| *f != 0.0),
                None => None,
            };
            Ok(ObservationValue::Timeseries {
                count,
                frequency,
                values,
            })
        }
        DataItemCategory::Sample if data_item.is_three_space() => {
            if unavailable {
                return Ok(ObservationValue::ThreeSpace { value: None });
            }
            let v = raw.to_vector(VALUE_KEY).map_err(invalid)?;
            if v.len() != 3 {
                return Err(invalid(PropertyError::VectorSize {
                    property: VALUE_KEY.to_string(),
                    count: v.len(),
                    expected: 3,
                }));
            }
            Ok(ObservationValue::ThreeSpace {
                value: Some([v[0], v[1], v[2]]),
            })
        }
        DataItemCategory::Sample => {
            let value = if unavailable || text.is_empty() {
                None
            } else {
                Some(raw.to_double(VALUE_KEY).map_err(invalid)?)
            };
            let duration = match properties.get("duration") {
                Some(v) => Some(v.to_double("duration").map_err(invalid)?),
                None => None,
            };
            Ok(ObservationValue::Sample {
                value,
                duration,
                statistic: data_item.statistic().map(str::to_string),
            })
        }
        DataItemCategory::Event if data_item.is_data_set() => {
            let set = if unavailable {
                DataSet::new()
            } else {
                match &raw {
                    Value::DataSet(ds) => ds.clone(),
                    Value::String(s) => DataSet::parse(s, data_item.is_table()).ok_or_else(|| {
                        invalid(PropertyError::Conversion {
                            property: VALUE_KEY.to_string(),
                            value: s.clone(),
                            expected: "DATA_SET",
                        })
                    })?,
                    Value::Empty => DataSet::new(),
                    other => {
                        return Err(invalid(PropertyError::Conversion {
                            property: VALUE_KEY.to_string(),
                            value: other.to_text(),
                            expected: "DATA_SET",
                        }))
                    }
                }
            };
            let reset_triggered = non_empty(properties.get("resetTriggered"));
            if data_item.is_table() {
                Ok(ObservationValue::TableEvent {
                    set,
                    reset_triggered,
                })
            } else {
                Ok(ObservationValue::DataSetEvent {
                    set,
                    reset_triggered,
                })
            }
        }
        DataItemCategory::Event => match data_item.item_type() {
            "ASSET_CHANGED" | "ASSET_REMOVED" => Ok(ObservationValue::AssetEvent {
                asset_type: non_empty(properties.get("assetType")),
                value: raw,
            }),
            "MESSAGE" => {
                let (entity, errors) =
                    MESSAGE_FACTORY.make(&data_item.observation_name(), properties.clone());
                if !errors.is_empty() {
                    return Err(EntityError::Invalid {
                        name: data_item.observation_name(),
                        errors,
                    });
                }
                Ok(ObservationValue::Message {
                    native_code: entity
                        .get_string("nativeCode")
                        .filter(|c| !c.is_empty())
                        .map(str::to_string),
                    text: raw,
                })
            }
            "ALARM" => Ok(ObservationValue::Alarm {
                code: non_empty(properties.get("code")),
                native_code: non_empty(properties.get("nativeCode")),
                severity: non_empty(properties.get("severity")),
                state: non_empty(properties.get("state")),
                text: raw,
            }),
            _ => Ok(ObservationValue::Event(coerce_event(&raw))),
        },
    }
}

/// Events keep integers as integers where the text allows, otherwise the
/// original string.
fn coerce_event(raw: &Value) -> Value {
    match raw {
        Value::String(s) => {
            if let Ok(i) = s.parse::<i64>() {
                Value::Int(i)
            } else {
                raw.clone()
            }
        }
        Value::Empty => Value::String(String::new()),
        other => other.clone(),
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .map(|v| v.to_text())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DataItemCategory;

    fn sample_item() -> Arc<DataItem> {
        Arc::new(
            DataItem::builder("x1", DataItemCategory::Sample)
                .item_type("POSITION")
                .units("MILLIMETER")
                .native_units("FOOT")
                .build()
                .unwrap(),
        )
    }

    fn props(value: &str) -> Properties {
        let mut p = Properties::new();
        p.insert(VALUE_KEY.to_string(), Value::String(value.to_string()));
        p
    }

    #[test]
    fn sample_observation_from_text() {
        let di = sample_item();
        let obs = Observation::make(&di, &props("1.5"), Utc::now()).unwrap();
        assert!(!obs.is_unavailable());
        assert_eq!(
            obs.value(),
            &ObservationValue::Sample {
                value: Some(1.5),
                duration: None,
                statistic: None
            }
        );
    }

    #[test]
    fn unavailable_sample_has_no_value() {
        let di = sample_item();
        let obs = Observation::make(&di, &props(UNAVAILABLE), Utc::now()).unwrap();
        assert!(obs.is_unavailable());
        assert_eq!(obs.value_text(), UNAVAILABLE);
    }

    #[test]
    fn orphan_after_data_item_drop() {
        let di = sample_item();
        let obs = Observation::make(&di, &props("1"), Utc::now()).unwrap();
        assert!(!obs.is_orphan());
        drop(di);
        assert!(obs.is_orphan());
    }

    #[test]
    fn event_integers_are_typed() {
        let di = Arc::new(
            DataItem::builder("c1", DataItemCategory::Event)
                .item_type("PART_COUNT")
                .build()
                .unwrap(),
        );
        let obs = Observation::make(&di, &props("41"), Utc::now()).unwrap();
        assert_eq!(obs.value(), &ObservationValue::Event(Value::Int(41)));
    }

    #[test]
    fn time_series_count_mismatch_is_rejected() {
        let di = Arc::new(
            DataItem::builder("t1", DataItemCategory::Sample)
                .item_type("POSITION")
                .representation(Representation::TimeSeries)
                .build()
                .unwrap(),
        );
        let mut p = props("1 2 3");
        p.insert("sampleCount".to_string(), Value::Int(4));
        assert!(Observation::make(&di, &p, Utc::now()).is_err());
    }

    #[test]
    fn condition_requires_level() {
        let di = Arc::new(
            DataItem::builder("c1", DataItemCategory::Condition)
                .item_type("TEMPERATURE")
                .build()
                .unwrap(),
        );
        assert!(Observation::make(&di, &props("overheat"), Utc::now()).is_err());

        let mut p = props("overheat");
        p.insert("level".to_string(), Value::String("FAULT".into()));
        p.insert("nativeCode".to_string(), Value::String("A".into()));
        let obs = Observation::make(&di, &p, Utc::now()).unwrap();
        let cond = obs.condition().unwrap();
        assert_eq!(cond.level, ConditionLevel::Fault);
        assert_eq!(cond.code, "A");
    }
}
