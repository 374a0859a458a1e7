//! JSON payloads from message brokers
//!
//! Payloads are either a single observation `{dataItemId, timestamp?,
//! value}`, a map of data item keys to values (optionally with a shared
//! timestamp), or an asset document `{assetId, assetType, …}`.

use chrono::{DateTime, Utc};
use serde_json::Value as Json;

use agent_types::entity::Value;

use crate::error::ProtocolError;

/// One decoded observation from a JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonObservation {
    /// Data item id or name to resolve against the device
    pub key: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub value: Value,
}

/// A decoded asset document.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonAsset {
    pub asset_id: String,
    pub asset_type: String,
    pub removed: bool,
    pub body: String,
}

/// The interpreted payload of a broker message.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonPayload {
    Observations(Vec<JsonObservation>),
    Asset(JsonAsset),
}

/// Decode a JSON payload into observations or an asset.
pub fn decode(payload: &str) -> Result<JsonPayload, ProtocolError> {
    let json: Json = serde_json::from_str(payload)?;

    let obj = json.as_object().ok_or_else(|| ProtocolError::InvalidJson {
        reason: "payload is not an object".to_string(),
    })?;

    if obj.contains_key("assetId") {
        return decode_asset(obj, payload);
    }

    if obj.contains_key("dataItemId") {
        return Ok(JsonPayload::Observations(vec![decode_single(obj)?]));
    }

    // A map of data item keys to values, with an optional shared timestamp.
    let shared_ts = obj.get("timestamp").and_then(parse_timestamp);
    let mut observations = Vec::new();
    for (key, value) in obj {
        if key == "timestamp" {
            continue;
        }
        observations.push(JsonObservation {
            key: key.clone(),
            timestamp: shared_ts,
            value: to_value(value),
        });
    }

    if observations.is_empty() {
        return Err(ProtocolError::InvalidJson {
            reason: "no observations in payload".to_string(),
        });
    }
    Ok(JsonPayload::Observations(observations))
}

fn decode_single(
    obj: &serde_json::Map<String, Json>,
) -> Result<JsonObservation, ProtocolError> {
    let key = obj
        .get("dataItemId")
        .and_then(Json::as_str)
        .ok_or_else(|| ProtocolError::InvalidJson {
            reason: "dataItemId must be a string".to_string(),
        })?;
    let value = obj.get("value").ok_or_else(|| ProtocolError::InvalidJson {
        reason: "missing value".to_string(),
    })?;

    Ok(JsonObservation {
        key: key.to_string(),
        timestamp: obj.get("timestamp").and_then(parse_timestamp),
        value: to_value(value),
    })
}

fn decode_asset(
    obj: &serde_json::Map<String, Json>,
    payload: &str,
) -> Result<JsonPayload, ProtocolError> {
    let asset_id = obj
        .get("assetId")
        .and_then(Json::as_str)
        .ok_or_else(|| ProtocolError::InvalidJson {
            reason: "assetId must be a string".to_string(),
        })?;
    let asset_type = obj
        .get("assetType")
        .or_else(|| obj.get("type"))
        .and_then(Json::as_str)
        .unwrap_or("Unknown");

    Ok(JsonPayload::Asset(JsonAsset {
        asset_id: asset_id.to_string(),
        asset_type: asset_type.to_string(),
        removed: obj.get("removed").and_then(Json::as_bool).unwrap_or(false),
        body: payload.to_string(),
    }))
}

fn parse_timestamp(json: &Json) -> Option<DateTime<Utc>> {
    json.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn to_value(json: &Json) -> Value {
    match json {
        Json::String(s) => Value::String(s.clone()),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::Bool(b) => Value::Bool(*b),
        Json::Null => Value::Null,
        other => Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_observation_payload() {
        let payload = r#"{"dataItemId":"X","timestamp":"2021-01-19T10:00:00Z","value":1.0}"#;
        match decode(payload).unwrap() {
            JsonPayload::Observations(obs) => {
                assert_eq!(obs.len(), 1);
                assert_eq!(obs[0].key, "X");
                assert_eq!(obs[0].value, Value::Double(1.0));
                assert!(obs[0].timestamp.is_some());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn map_payload_shares_the_timestamp() {
        let payload = r#"{"timestamp":"2021-01-19T10:00:00Z","X":1,"Y":"ACTIVE"}"#;
        match decode(payload).unwrap() {
            JsonPayload::Observations(obs) => {
                assert_eq!(obs.len(), 2);
                assert!(obs.iter().all(|o| o.timestamp.is_some()));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn asset_payload() {
        let payload = r#"{"assetId":"A1","assetType":"CuttingTool"}"#;
        match decode(payload).unwrap() {
            JsonPayload::Asset(asset) => {
                assert_eq!(asset.asset_id, "A1");
                assert_eq!(asset.asset_type, "CuttingTool");
                assert!(!asset.removed);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(decode("not json").is_err());
        assert!(decode("[1,2,3]").is_err());
        assert!(decode(r#"{"dataItemId":"X"}"#).is_err());
    }
}
