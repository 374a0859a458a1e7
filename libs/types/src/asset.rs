//! Assets: removable, trackable workpiece records keyed by asset id

use chrono::{DateTime, Utc};

/// A tracked workpiece or tool record.
///
/// The body is the raw asset document as received (XML or JSON); document
/// rendering lives behind the printer seam, the agent only tracks identity
/// and lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    asset_id: String,
    asset_type: String,
    device_uuid: Option<String>,
    timestamp: DateTime<Utc>,
    removed: bool,
    body: String,
}

impl Asset {
    pub fn new(
        asset_id: impl Into<String>,
        asset_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            asset_type: asset_type.into(),
            device_uuid: None,
            timestamp,
            removed: false,
            body: body.into(),
        }
    }

    pub fn with_device_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.device_uuid = Some(uuid.into());
        self
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn set_asset_id(&mut self, id: impl Into<String>) {
        self.asset_id = id.into();
    }

    pub fn asset_type(&self) -> &str {
        &self.asset_type
    }

    pub fn device_uuid(&self) -> Option<&str> {
        self.device_uuid.as_deref()
    }

    pub fn set_device_uuid(&mut self, uuid: impl Into<String>) {
        self.device_uuid = Some(uuid.into());
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamp = timestamp;
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn set_removed(&mut self, removed: bool) {
        self.removed = removed;
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// An asset mutation arriving through an adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetCommand {
    RemoveAsset {
        asset_id: String,
    },
    RemoveAll {
        asset_type: Option<String>,
        device: Option<String>,
    },
}
