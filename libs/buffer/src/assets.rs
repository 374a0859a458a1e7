//! Bounded asset storage with insertion-order eviction
//!
//! Assets are keyed by asset id; re-adding an id moves it to the back of
//! the eviction order. Removal marks the record removed but keeps it until
//! it ages out, so `removed=true` queries can still serve it. Counts by
//! device and type exclude removed assets.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use agent_types::Asset;

/// Query parameters for listing assets.
#[derive(Debug, Clone, Default)]
pub struct AssetQuery {
    pub device_uuid: Option<String>,
    pub asset_type: Option<String>,
    /// Include removed assets
    pub removed: bool,
    /// Maximum number of results
    pub count: Option<usize>,
}

struct Inner {
    /// Asset ids, oldest first.
    order: Vec<String>,
    assets: HashMap<String, Arc<Asset>>,
}

/// Bounded LRU store of assets keyed by asset id.
pub struct AssetStorage {
    max_assets: usize,
    inner: Mutex<Inner>,
}

impl AssetStorage {
    pub fn new(max_assets: usize) -> Self {
        Self {
            max_assets,
            inner: Mutex::new(Inner {
                order: Vec::new(),
                assets: HashMap::new(),
            }),
        }
    }

    pub fn max_assets(&self) -> usize {
        self.max_assets
    }

    pub fn len(&self) -> usize {
        self.inner.lock().assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().assets.is_empty()
    }

    /// Insert or replace an asset, evicting the oldest when full.
    /// Returns the evicted asset, if any.
    pub fn add(&self, asset: Asset) -> Option<Arc<Asset>> {
        let mut inner = self.inner.lock();
        let id = asset.asset_id().to_string();

        if inner.assets.contains_key(&id) {
            inner.order.retain(|existing| existing != &id);
        }
        inner.order.push(id.clone());
        inner.assets.insert(id, Arc::new(asset));

        if inner.assets.len() > self.max_assets {
            let oldest = inner.order.remove(0);
            let evicted = inner.assets.remove(&oldest);
            if let Some(evicted) = &evicted {
                debug!(asset_id = %oldest, "evicting oldest asset");
                return Some(evicted.clone());
            }
        }
        None
    }

    pub fn get(&self, asset_id: &str) -> Option<Arc<Asset>> {
        self.inner.lock().assets.get(asset_id).cloned()
    }

    /// Mark an asset removed; returns the updated record.
    pub fn remove(&self, asset_id: &str, timestamp: DateTime<Utc>) -> Option<Arc<Asset>> {
        let mut inner = self.inner.lock();
        let existing = inner.assets.get(asset_id)?;
        if existing.is_removed() {
            return None;
        }
        let mut updated = (**existing).clone();
        updated.set_removed(true);
        updated.set_timestamp(timestamp);
        let updated = Arc::new(updated);
        inner.assets.insert(asset_id.to_string(), updated.clone());
        Some(updated)
    }

    /// Mark every asset matching device/type removed; returns the updated
    /// records.
    pub fn remove_all(
        &self,
        device_uuid: Option<&str>,
        asset_type: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Vec<Arc<Asset>> {
        let ids: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .order
                .iter()
                .filter(|id| {
                    inner
                        .assets
                        .get(*id)
                        .map(|a| {
                            !a.is_removed()
                                && device_uuid
                                    .map(|d| a.device_uuid() == Some(d))
                                    .unwrap_or(true)
                                && asset_type.map(|t| a.asset_type() == t).unwrap_or(true)
                        })
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        ids.iter()
            .filter_map(|id| self.remove(id, timestamp))
            .collect()
    }

    /// List assets matching the query, most recent first.
    pub fn list(&self, query: &AssetQuery) -> Vec<Arc<Asset>> {
        let inner = self.inner.lock();
        let mut out: Vec<Arc<Asset>> = inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.assets.get(id))
            .filter(|a| {
                (query.removed || !a.is_removed())
                    && query
                        .device_uuid
                        .as_deref()
                        .map(|d| a.device_uuid() == Some(d))
                        .unwrap_or(true)
                    && query
                        .asset_type
                        .as_deref()
                        .map(|t| a.asset_type() == t)
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        if let Some(count) = query.count {
            out.truncate(count);
        }
        out
    }

    /// Live asset count for a device, by type. Removed assets are excluded.
    pub fn count_by_type(&self, device_uuid: &str) -> HashMap<String, usize> {
        let inner = self.inner.lock();
        let mut counts = HashMap::new();
        for asset in inner.assets.values() {
            if !asset.is_removed() && asset.device_uuid() == Some(device_uuid) {
                *counts.entry(asset.asset_type().to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Total live asset count.
    pub fn live_count(&self) -> usize {
        self.inner
            .lock()
            .assets
            .values()
            .filter(|a| !a.is_removed())
            .count()
    }
}
