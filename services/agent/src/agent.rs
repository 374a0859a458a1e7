//! The agent coordinator
//!
//! Owns the device registry, the circular buffer, asset storage, sources
//! and sinks, and routes everything between them. Implements the pipeline
//! contract: sources deliver observations, assets, commands and connection
//! transitions here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use agent_buffer::{AssetStorage, ChangeObserver, CircularBuffer, FilterSet};
use agent_pipeline::transforms::{DeliverObservation, DuplicateFilter};
use agent_pipeline::{
    ConnectionStatus, DeviceCommand, Pipeline, PipelineContract, PipelineEntity,
};
use agent_types::entity::{DataSet, DataSetEntry, DataSetValue, Properties, Value, VALUE_KEY};
use agent_types::{
    Asset, AssetCommand, DataItem, Device, Observation, ObservationPtr, SequenceNumber,
    AVAILABLE, UNAVAILABLE,
};

use crate::agent_device::{
    self, STATUS_CLOSED, STATUS_ESTABLISHED, STATUS_LISTENING,
};
use crate::error::{AgentError, Result};
use crate::hooks::HookManager;
use crate::sink::Sink;
use crate::source::Source;

/// How a source maps onto devices for status fan-out.
#[derive(Debug, Clone, Default)]
pub struct SourceBinding {
    /// Device names or uuids fed by the source; empty means every device.
    pub devices: Vec<String>,
    /// Force availability on connect / unavailability on disconnect.
    pub auto_available: bool,
}

struct DeviceRegistry {
    devices: Vec<Arc<Device>>,
    agent_uuid: String,
}

impl DeviceRegistry {
    fn find(&self, key: &str) -> Option<Arc<Device>> {
        self.devices
            .iter()
            .find(|d| d.uuid() == key || d.name() == key)
            .cloned()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.devices
            .iter()
            .position(|d| d.uuid() == key || d.name() == key)
    }

    /// The first device that is not the agent device.
    fn default_device(&self) -> Option<Arc<Device>> {
        self.devices
            .iter()
            .find(|d| d.uuid() != self.agent_uuid)
            .cloned()
    }
}

/// Settings the coordinator needs at construction.
pub struct AgentSettings {
    pub buffer_size: u32,
    pub checkpoint_frequency: u64,
    pub max_assets: usize,
    pub agent_uuid: String,
    pub device_file: Option<PathBuf>,
    pub version_device_file: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            buffer_size: 17,
            checkpoint_frequency: 1000,
            max_assets: 1024,
            agent_uuid: "agent".to_string(),
            device_file: None,
            version_device_file: false,
        }
    }
}

/// The agent.
pub struct Agent {
    instance_id: u64,
    buffer: Arc<CircularBuffer>,
    assets: Arc<AssetStorage>,
    registry: RwLock<DeviceRegistry>,
    data_items: RwLock<HashMap<String, Arc<DataItem>>>,
    sources: Mutex<Vec<Arc<dyn Source>>>,
    sinks: RwLock<Vec<Arc<dyn Sink>>>,
    bindings: RwLock<HashMap<String, SourceBinding>>,
    loopback: parking_lot::Mutex<Option<Pipeline>>,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    before_start_hooks: Mutex<HookManager<Agent>>,
    before_stop_hooks: Mutex<HookManager<Agent>>,
    device_file: Option<PathBuf>,
    version_device_file: bool,
}

impl Agent {
    /// Build the agent with its own agent device registered.
    pub fn create(settings: AgentSettings) -> Result<Arc<Agent>> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let agent = Arc::new(Agent {
            instance_id: Utc::now().timestamp() as u64,
            buffer: Arc::new(CircularBuffer::new(
                settings.buffer_size,
                settings.checkpoint_frequency,
            )),
            assets: Arc::new(AssetStorage::new(settings.max_assets)),
            registry: RwLock::new(DeviceRegistry {
                devices: Vec::new(),
                agent_uuid: settings.agent_uuid.clone(),
            }),
            data_items: RwLock::new(HashMap::new()),
            sources: Mutex::new(Vec::new()),
            sinks: RwLock::new(Vec::new()),
            bindings: RwLock::new(HashMap::new()),
            loopback: parking_lot::Mutex::new(None),
            started: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
            before_start_hooks: Mutex::new(HookManager::new()),
            before_stop_hooks: Mutex::new(HookManager::new()),
            device_file: settings.device_file,
            version_device_file: settings.version_device_file,
        });

        let contract: Arc<dyn PipelineContract> = agent.clone();
        let loopback = Pipeline::linear(vec![
            Arc::new(DuplicateFilter::new(contract.clone())),
            Arc::new(DeliverObservation::new(contract)),
        ]);
        *agent.loopback.lock() = Some(loopback);

        let agent_device =
            agent_device::build_agent_device(&settings.agent_uuid, "Agent")?;
        agent.install_device(agent_device)?;
        Ok(agent)
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn buffer(&self) -> &Arc<CircularBuffer> {
        &self.buffer
    }

    pub fn asset_storage(&self) -> &Arc<AssetStorage> {
        &self.assets
    }

    pub fn shutdown_watch(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Request an orderly shutdown.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn on_before_start(&self, name: &str, hook: impl Fn(&Agent) + Send + Sync + 'static) {
        self.before_start_hooks.lock().add(name, hook);
    }

    pub fn on_before_stop(&self, name: &str, hook: impl Fn(&Agent) + Send + Sync + 'static) {
        self.before_stop_hooks.lock().add(name, hook);
    }

    // ------------------------------------------------------------------
    // Device registry
    // ------------------------------------------------------------------

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.registry.read().devices.clone()
    }

    pub fn find_device_by_key(&self, key: &str) -> Option<Arc<Device>> {
        self.registry.read().find(key)
    }

    pub fn agent_device(&self) -> Option<Arc<Device>> {
        let registry = self.registry.read();
        let uuid = registry.agent_uuid.clone();
        registry.find(&uuid)
    }

    pub fn data_item(&self, id: &str) -> Option<Arc<DataItem>> {
        self.data_items.read().get(id).cloned()
    }

    /// Register a new device. Duplicate uuids are rejected; at startup the
    /// caller treats that as fatal.
    pub fn add_device(&self, device: Device) -> Result<Arc<Device>> {
        let added = self.install_device(device)?;
        if self.started.load(Ordering::SeqCst) {
            self.initialize_data_items(&added, None);
            self.device_event("device_added", added.uuid());
        }
        Ok(added)
    }

    fn install_device(&self, device: Device) -> Result<Arc<Device>> {
        let mut registry = self.registry.write();
        if registry.find(device.uuid()).is_some() {
            return Err(AgentError::DuplicateDevice {
                uuid: device.uuid().to_string(),
            });
        }
        let device = Arc::new(device);
        registry.devices.push(device.clone());
        drop(registry);

        let mut map = self.data_items.write();
        for item in device.data_items() {
            map.insert(item.id().to_string(), item);
        }
        Ok(device)
    }

    /// Receive a device model update: install a new device, or diff and
    /// replace an existing one, preserving the availability and asset
    /// bookkeeping data items.
    pub fn receive_device(&self, mut device: Device, version: bool) -> bool {
        let key = device.uuid().to_string();
        let existing = {
            let registry = self.registry.read();
            registry
                .find(&key)
                .or_else(|| registry.find(device.name()))
        };

        let Some(old) = existing else {
            info!(uuid = %key, "received new device, adding");
            match self.add_device(device) {
                Ok(_) => {
                    if version {
                        self.write_versioned_device_file();
                    }
                    return true;
                }
                Err(e) => {
                    error!(error = %e, "cannot add received device");
                    return false;
                }
            }
        };

        // Keep the previous bookkeeping items alive when the incoming
        // model does not declare them.
        if let (Some(item), None) = (old.asset_changed(), device.asset_changed()) {
            device.adopt_data_item(item);
        }
        if let (Some(item), None) = (old.asset_removed(), device.asset_removed()) {
            device.adopt_data_item(item);
        }
        if let (Some(item), None) = (old.availability(), device.availability()) {
            device.adopt_data_item(item);
        }
        if let (Some(item), None) = (old.asset_count(), device.asset_count()) {
            device.adopt_data_item(item);
        }

        if device == *old {
            info!(uuid = %key, "device did not change, ignoring update");
            return false;
        }

        info!(uuid = %key, "device changed, updating model");
        let device = Arc::new(device);
        let old_ids: Vec<String> = old.data_items().iter().map(|i| i.id().to_string()).collect();

        {
            let mut registry = self.registry.write();
            if let Some(pos) = registry.position(old.uuid()) {
                registry.devices[pos] = device.clone();
            } else {
                error!(uuid = %key, "device vanished during update");
                return false;
            }
        }

        {
            let mut map = self.data_items.write();
            for id in &old_ids {
                map.remove(id);
            }
            for item in device.data_items() {
                map.insert(item.id().to_string(), item);
            }
        }

        // Orphan observations for removed ids, re-point the rest.
        self.buffer.update_data_items(&self.data_items.read().clone());

        let skip: FilterSet = old_ids.into_iter().collect();
        self.initialize_data_items(&device, Some(&skip));

        if version {
            self.write_versioned_device_file();
        }
        self.device_event("device_changed", device.uuid());
        true
    }

    /// Prime every data item with UNAVAILABLE or its constant value.
    fn initialize_data_items(&self, device: &Arc<Device>, skip: Option<&FilterSet>) {
        let now = Utc::now();
        for item in device.data_items() {
            if skip.map(|s| s.contains(item.id())).unwrap_or(false) {
                continue;
            }
            let primed = {
                let guard = self.buffer.lock();
                guard.latest().get(item.id()).is_some()
            };
            if !primed {
                let obs = Observation::make_unavailable(&item, now);
                self.run_loopback(PipelineEntity::Observations(vec![obs]));
            }
        }
    }

    /// Rename the device file with a timestamp suffix and write the
    /// current model.
    fn write_versioned_device_file(&self) {
        let Some(path) = &self.device_file else {
            return;
        };
        if !self.version_device_file {
            return;
        }
        let suffix = Utc::now().format(".%Y-%m-%dT%H+%M+%SZ").to_string();
        let mut versioned = path.clone().into_os_string();
        versioned.push(&suffix);
        if path.exists() {
            if let Err(e) = std::fs::rename(path, &versioned) {
                error!(error = %e, "cannot version device file");
                return;
            }
        }
        let devices: Vec<Arc<Device>> = {
            let registry = self.registry.read();
            let agent_uuid = registry.agent_uuid.clone();
            registry
                .devices
                .iter()
                .filter(|d| d.uuid() != agent_uuid)
                .cloned()
                .collect()
        };
        if let Err(e) = crate::device_reader::write_devices(path, &devices) {
            error!(error = %e, "cannot write updated device file");
        }
    }

    fn device_event(&self, item_id: &str, uuid: &str) {
        if let Some(item) = self.data_item(item_id) {
            let mut props = Properties::new();
            props.insert(VALUE_KEY.to_string(), Value::String(uuid.to_string()));
            self.receive_data_item(&item, props);
        }
    }

    /// Inject an observation for a data item through the loopback
    /// pipeline.
    pub fn receive_data_item(&self, item: &Arc<DataItem>, properties: Properties) {
        match Observation::make(item, &properties, Utc::now()) {
            Ok(obs) => {
                self.run_loopback(PipelineEntity::Observations(vec![obs]));
            }
            Err(e) => error!(data_item = item.id(), error = %e, "loopback observation invalid"),
        }
    }

    fn run_loopback(&self, entity: PipelineEntity) {
        let guard = self.loopback.lock();
        if let Some(pipeline) = guard.as_ref() {
            let _ = pipeline.run(entity);
        }
    }

    fn latest_observation(&self, id: &str) -> Option<ObservationPtr> {
        self.buffer.lock().latest().get(id).cloned()
    }

    // ------------------------------------------------------------------
    // Sources and sinks
    // ------------------------------------------------------------------

    /// Register a status fan-out binding for a source identity.
    pub fn bind_source(&self, identity: &str, binding: SourceBinding) {
        self.bindings.write().insert(identity.to_string(), binding);
    }

    pub fn add_source(&self, source: Arc<dyn Source>, binding: SourceBinding) {
        self.bind_source(source.identity(), binding);

        // Publish the adapter on the agent device.
        if !source.is_loopback() {
            let registry_device = self.agent_device();
            if let Some(agent_dev) = registry_device {
                match agent_device::with_adapter(&agent_dev, source.identity(), source.name()) {
                    Ok(updated) => {
                        self.replace_device_in_place(&agent_dev, updated);
                    }
                    Err(e) => warn!(error = %e, "cannot add adapter to agent device"),
                }
            }
        }
        self.sources.lock().push(source);
    }

    fn replace_device_in_place(&self, old: &Arc<Device>, updated: Device) {
        let updated = Arc::new(updated);
        {
            let mut registry = self.registry.write();
            if let Some(pos) = registry.position(old.uuid()) {
                registry.devices[pos] = updated.clone();
            }
        }
        let mut map = self.data_items.write();
        for item in updated.data_items() {
            map.insert(item.id().to_string(), item);
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn Sink>) {
        self.sinks.write().push(sink);
    }

    pub fn sinks(&self) -> Vec<Arc<dyn Sink>> {
        self.sinks.read().clone()
    }

    /// Start sources and sinks after priming every data item.
    pub async fn start(&self) -> Result<()> {
        self.before_start_hooks.lock().exec(self);
        self.started.store(true, Ordering::SeqCst);

        for device in self.devices() {
            self.initialize_data_items(&device, None);
        }

        for sink in self.sinks() {
            sink.start().await?;
        }
        let sources: Vec<_> = self.sources.lock().clone();
        for source in sources {
            source.start().await?;
        }
        info!(instance = self.instance_id, "agent started");
        Ok(())
    }

    /// Orderly shutdown: sources first, then sinks.
    pub async fn stop(&self) {
        self.before_stop_hooks.lock().exec(self);
        let sources: Vec<_> = self.sources.lock().clone();
        for source in sources {
            source.stop().await;
        }
        for sink in self.sinks() {
            sink.stop().await;
        }
        self.started.store(false, Ordering::SeqCst);
        info!("agent stopped");
    }

    /// A source failed permanently. With no external source left the
    /// agent shuts down.
    pub fn source_failed(&self, identity: &str) {
        let mut sources = self.sources.lock();
        sources.retain(|s| s.identity() != identity);
        let external = sources.iter().any(|s| !s.is_loopback());
        drop(sources);

        if external {
            error!(source = identity, "source failed");
        } else {
            error!(
                source = identity,
                "source failed; no external sources remain, shutting down"
            );
            self.request_shutdown();
        }
    }

    // ------------------------------------------------------------------
    // Queries used by sinks
    // ------------------------------------------------------------------

    /// Register a change observer over a filter set.
    pub fn observe(&self, observer: &ChangeObserver, filter: &FilterSet) {
        self.buffer
            .add_observer(observer, filter.iter().cloned());
    }

    /// All data item ids, for unfiltered subscriptions.
    pub fn all_data_item_ids(&self) -> FilterSet {
        self.data_items.read().keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Asset handling
    // ------------------------------------------------------------------

    fn receive_asset(&self, mut asset: Asset) {
        let device = match asset.device_uuid() {
            Some(uuid) => self.find_device_by_key(uuid),
            None => self.registry.read().default_device(),
        };

        if let Some(device) = &device {
            if asset.device_uuid() != Some(device.uuid()) {
                asset.set_device_uuid(device.uuid());
            }
            // Asset ids starting with '@' are scoped to the device.
            if let Some(rest) = asset.asset_id().strip_prefix('@') {
                asset.set_asset_id(format!("{}{}", device.uuid(), rest));
            }
        }

        let removed = asset.is_removed();
        let asset_id = asset.asset_id().to_string();
        let asset_type = asset.asset_type().to_string();

        let evicted = self.assets.add(asset.clone());
        let stored = Arc::new(asset);
        for sink in self.sinks() {
            sink.publish_asset(&stored);
        }

        if let Some(device) = &device {
            let item = if removed {
                device.asset_removed()
            } else {
                device.asset_changed()
            };
            if let Some(item) = item {
                let mut props = Properties::new();
                props.insert("assetType".to_string(), Value::String(asset_type));
                props.insert(VALUE_KEY.to_string(), Value::String(asset_id));
                self.receive_data_item(&item, props);
            }
            if let Some(evicted) = evicted {
                debug!(asset = evicted.asset_id(), "asset evicted");
            }
            self.update_asset_counts(device);
        }
    }

    /// Remove one asset and notify.
    pub fn remove_asset(&self, asset_id: &str) -> bool {
        let Some(removed) = self.assets.remove(asset_id, Utc::now()) else {
            return false;
        };
        for sink in self.sinks() {
            sink.publish_asset(&removed);
        }
        self.notify_asset_removed(&removed);
        true
    }

    /// Remove every asset matching device/type and notify.
    pub fn remove_all_assets(
        &self,
        device: Option<&str>,
        asset_type: Option<&str>,
    ) -> usize {
        let uuid = device
            .and_then(|key| self.find_device_by_key(key))
            .map(|d| d.uuid().to_string())
            .or_else(|| device.map(str::to_string));
        let removed = self
            .assets
            .remove_all(uuid.as_deref(), asset_type, Utc::now());
        for asset in &removed {
            for sink in self.sinks() {
                sink.publish_asset(asset);
            }
            self.notify_asset_removed(asset);
        }
        removed.len()
    }

    fn notify_asset_removed(&self, asset: &Arc<Asset>) {
        let Some(uuid) = asset.device_uuid() else {
            return;
        };
        let Some(device) = self.find_device_by_key(uuid) else {
            return;
        };

        if let Some(item) = device.asset_removed() {
            let mut props = Properties::new();
            props.insert(
                "assetType".to_string(),
                Value::String(asset.asset_type().to_string()),
            );
            props.insert(
                VALUE_KEY.to_string(),
                Value::String(asset.asset_id().to_string()),
            );
            self.receive_data_item(&item, props);
        }

        // When the removed asset was the last-changed one, reset changed.
        if let Some(changed) = device.asset_changed() {
            if let Some(last) = self.latest_observation(changed.id()) {
                if last.value_text() == asset.asset_id() {
                    let mut props = Properties::new();
                    props.insert(
                        "assetType".to_string(),
                        Value::String(asset.asset_type().to_string()),
                    );
                    props.insert(
                        VALUE_KEY.to_string(),
                        Value::String(UNAVAILABLE.to_string()),
                    );
                    self.receive_data_item(&changed, props);
                }
            }
        }

        self.update_asset_counts(&device);
    }

    /// Publish the per-type asset counts as a data set.
    fn update_asset_counts(&self, device: &Arc<Device>) {
        let Some(item) = device.asset_count() else {
            return;
        };
        let counts = self.assets.count_by_type(device.uuid());
        let mut set = DataSet::new();
        for (asset_type, count) in counts {
            set.insert(asset_type, DataSetEntry::value(DataSetValue::Int(count as i64)));
        }
        let mut props = Properties::new();
        props.insert(VALUE_KEY.to_string(), Value::DataSet(set));
        self.receive_data_item(&item, props);
    }

    // ------------------------------------------------------------------
    // Connection status fan-out
    // ------------------------------------------------------------------

    fn bound_devices(&self, binding: &SourceBinding) -> Vec<Arc<Device>> {
        let registry = self.registry.read();
        if binding.devices.is_empty() {
            let agent_uuid = registry.agent_uuid.clone();
            registry
                .devices
                .iter()
                .filter(|d| d.uuid() != agent_uuid)
                .cloned()
                .collect()
        } else {
            binding
                .devices
                .iter()
                .filter_map(|key| registry.find(key))
                .collect()
        }
    }

    fn adapter_status(&self, source: &str, value: &str) {
        if let Some(item) = self.data_item(&agent_device::connection_status_id(source)) {
            let mut props = Properties::new();
            props.insert(VALUE_KEY.to_string(), Value::String(value.to_string()));
            self.receive_data_item(&item, props);
        }
    }

    fn on_disconnected(&self, source: &str, binding: &SourceBinding) {
        debug!(source, "disconnected, marking bound values unavailable");
        self.adapter_status(source, STATUS_CLOSED);

        for device in self.bound_devices(binding) {
            for item in device.data_items() {
                let bound_to_source = item.data_source() == Some(source);
                let availability = binding.auto_available
                    && item.data_source().is_none()
                    && item.is_availability();
                if !bound_to_source && !availability {
                    continue;
                }
                let Some(latest) = self.latest_observation(item.id()) else {
                    continue;
                };
                let value = match item.constant_value() {
                    Some(constant) => Some(constant.to_string()),
                    None if !latest.is_unavailable() => Some(UNAVAILABLE.to_string()),
                    None => None,
                };
                if let Some(value) = value {
                    let mut props = Properties::new();
                    if item.is_condition() {
                        props.insert("level".to_string(), Value::String(value));
                    } else {
                        props.insert(VALUE_KEY.to_string(), Value::String(value));
                    }
                    self.receive_data_item(&item, props);
                }
            }
        }
    }

    fn on_connected(&self, source: &str, binding: &SourceBinding) {
        self.adapter_status(source, STATUS_ESTABLISHED);
        if !binding.auto_available {
            return;
        }
        debug!(source, "connected, marking availability");
        for device in self.bound_devices(binding) {
            if let Some(item) = device.availability() {
                let mut props = Properties::new();
                props.insert(VALUE_KEY.to_string(), Value::String(AVAILABLE.to_string()));
                self.receive_data_item(&item, props);
            }
        }
    }

    // ------------------------------------------------------------------
    // Protocol commands
    // ------------------------------------------------------------------

    fn receive_command(&self, source: &str, command: DeviceCommand) {
        let device = command
            .device
            .as_deref()
            .and_then(|key| self.find_device_by_key(key))
            .or_else(|| {
                let bindings = self.bindings.read();
                bindings
                    .get(source)
                    .and_then(|b| b.devices.first().cloned())
                    .and_then(|key| self.find_device_by_key(&key))
            })
            .or_else(|| self.registry.read().default_device());

        let Some(device) = device else {
            warn!(command = %command.command, "no device for command");
            return;
        };

        match command.command.as_str() {
            "uuid" => {
                let mut updated = (*device).clone();
                updated.set_uuid(command.value.clone());
                self.replace_device_identity(&device, updated);
            }
            "manufacturer" | "serialnumber" | "station" | "description" | "nativename" => {
                let mut updated = (*device).clone();
                updated.set_attribute(command.command.clone(), command.value.clone());
                self.replace_device_identity(&device, updated);
            }
            "calibration" => {
                debug!(device = device.uuid(), "calibration command ignored");
            }
            other => {
                warn!(command = other, "unrecognized device command");
            }
        }
    }

    /// Swap a device for an edited copy, rebuilding indices and
    /// re-pointing buffered observations.
    fn replace_device_identity(&self, old: &Arc<Device>, updated: Device) {
        let updated = Arc::new(updated);
        {
            let mut registry = self.registry.write();
            if let Some(pos) = registry.position(old.uuid()) {
                registry.devices[pos] = updated.clone();
            }
        }
        {
            let mut map = self.data_items.write();
            for item in old.data_items() {
                map.remove(item.id());
            }
            for item in updated.data_items() {
                map.insert(item.id().to_string(), item);
            }
        }
        self.buffer.update_data_items(&self.data_items.read().clone());
        self.device_event("device_changed", updated.uuid());
    }
}

impl PipelineContract for Agent {
    fn find_device(&self, key: &str) -> Option<Arc<Device>> {
        self.find_device_by_key(key)
    }

    fn default_device(&self) -> Option<Arc<Device>> {
        self.registry.read().default_device()
    }

    fn check_duplicate(&self, observation: &ObservationPtr) -> Option<ObservationPtr> {
        self.buffer.check_duplicate(observation)
    }

    fn deliver_observation(&self, observation: Observation) -> (SequenceNumber, ObservationPtr) {
        let (sequence, ptr) = self.buffer.add(observation);
        if sequence > 0 {
            for sink in self.sinks() {
                sink.publish_observation(&ptr);
            }
        }
        (sequence, ptr)
    }

    fn deliver_asset(&self, asset: Asset) {
        self.receive_asset(asset);
    }

    fn deliver_asset_command(&self, command: AssetCommand) {
        match command {
            AssetCommand::RemoveAsset { asset_id } => {
                if !self.remove_asset(&asset_id) {
                    warn!(asset_id = %asset_id, "remove for unknown asset");
                }
            }
            AssetCommand::RemoveAll { asset_type, device } => {
                self.remove_all_assets(device.as_deref(), asset_type.as_deref());
            }
        }
    }

    fn deliver_connection_status(&self, source: &str, status: ConnectionStatus) {
        let binding = self.bindings.read().get(source).cloned().unwrap_or_default();
        match status {
            ConnectionStatus::Connecting => self.adapter_status(source, STATUS_LISTENING),
            ConnectionStatus::Connected => self.on_connected(source, &binding),
            ConnectionStatus::Disconnected => self.on_disconnected(source, &binding),
        }
    }

    fn deliver_command(&self, source: &str, command: DeviceCommand) {
        self.receive_command(source, command);
    }
}
