//! Terminal delivery transforms

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::contract::PipelineContract;
use crate::{GuardAction, PipelineEntity, Transform};

/// Commits observations to the agent and reports the committed handles.
pub struct DeliverObservation {
    contract: Arc<dyn PipelineContract>,
    delivered: AtomicU64,
}

impl DeliverObservation {
    pub fn new(contract: Arc<dyn PipelineContract>) -> Self {
        Self {
            contract,
            delivered: AtomicU64::new(0),
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl Transform for DeliverObservation {
    fn name(&self) -> &'static str {
        "DeliverObservation"
    }

    fn guard(&self, entity: &PipelineEntity) -> GuardAction {
        match entity {
            PipelineEntity::Observations(_) => GuardAction::Run,
            _ => GuardAction::Skip,
        }
    }

    fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
        let PipelineEntity::Observations(observations) = entity else {
            return None;
        };

        let mut committed = Vec::with_capacity(observations.len());
        for obs in observations {
            let (sequence, ptr) = self.contract.deliver_observation(obs);
            if sequence > 0 {
                committed.push(ptr);
            }
        }
        self.delivered.fetch_add(committed.len() as u64, Ordering::Relaxed);
        Some(PipelineEntity::Committed(committed))
    }
}

/// Commits assets to the agent's asset storage.
pub struct DeliverAsset {
    contract: Arc<dyn PipelineContract>,
    default_device: Option<String>,
    delivered: AtomicU64,
}

impl DeliverAsset {
    pub fn new(contract: Arc<dyn PipelineContract>, default_device: Option<String>) -> Self {
        Self {
            contract,
            default_device,
            delivered: AtomicU64::new(0),
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl Transform for DeliverAsset {
    fn name(&self) -> &'static str {
        "DeliverAsset"
    }

    fn guard(&self, entity: &PipelineEntity) -> GuardAction {
        match entity {
            PipelineEntity::Assets(_) => GuardAction::Run,
            _ => GuardAction::Skip,
        }
    }

    fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
        let PipelineEntity::Assets(assets) = entity else {
            return None;
        };

        let count = assets.len() as u64;
        for mut asset in assets {
            if asset.device_uuid().is_none() {
                if let Some(device) = &self.default_device {
                    asset.set_device_uuid(device.clone());
                }
            }
            self.contract.deliver_asset(asset);
        }
        self.delivered.fetch_add(count, Ordering::Relaxed);
        None
    }
}

/// Executes asset mutations.
pub struct DeliverAssetCommand {
    contract: Arc<dyn PipelineContract>,
}

impl DeliverAssetCommand {
    pub fn new(contract: Arc<dyn PipelineContract>) -> Self {
        Self { contract }
    }
}

impl Transform for DeliverAssetCommand {
    fn name(&self) -> &'static str {
        "DeliverAssetCommand"
    }

    fn guard(&self, entity: &PipelineEntity) -> GuardAction {
        match entity {
            PipelineEntity::AssetCommand(_) => GuardAction::Run,
            _ => GuardAction::Skip,
        }
    }

    fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
        let PipelineEntity::AssetCommand(command) = entity else {
            return None;
        };
        debug!(?command, "delivering asset command");
        self.contract.deliver_asset_command(command);
        None
    }
}

/// Updates agent-device status and availability fan-out.
pub struct DeliverConnectionStatus {
    contract: Arc<dyn PipelineContract>,
    source: String,
}

impl DeliverConnectionStatus {
    pub fn new(contract: Arc<dyn PipelineContract>, source: String) -> Self {
        Self { contract, source }
    }
}

impl Transform for DeliverConnectionStatus {
    fn name(&self) -> &'static str {
        "DeliverConnectionStatus"
    }

    fn guard(&self, entity: &PipelineEntity) -> GuardAction {
        match entity {
            PipelineEntity::ConnectionStatus(_) => GuardAction::Run,
            _ => GuardAction::Skip,
        }
    }

    fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
        let PipelineEntity::ConnectionStatus(status) = entity else {
            return None;
        };
        self.contract.deliver_connection_status(&self.source, status);
        None
    }
}

/// Delivers protocol commands to the agent.
pub struct DeliverCommand {
    contract: Arc<dyn PipelineContract>,
    source: String,
}

impl DeliverCommand {
    pub fn new(contract: Arc<dyn PipelineContract>, source: String) -> Self {
        Self { contract, source }
    }
}

impl Transform for DeliverCommand {
    fn name(&self) -> &'static str {
        "DeliverCommand"
    }

    fn guard(&self, entity: &PipelineEntity) -> GuardAction {
        match entity {
            PipelineEntity::Command(_) => GuardAction::Run,
            _ => GuardAction::Skip,
        }
    }

    fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
        let PipelineEntity::Command(command) = entity else {
            return None;
        };
        self.contract.deliver_command(&self.source, command);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::test_support::TestContract;
    use crate::ConnectionStatus;
    use agent_types::entity::{Properties, Value};
    use agent_types::Observation;
    use chrono::Utc;

    #[test]
    fn observations_commit_and_report_sequences() {
        let contract = Arc::new(TestContract::new());
        let deliver = DeliverObservation::new(contract.clone());

        let di = contract.device.data_item("X").unwrap();
        let mut props = Properties::new();
        props.insert("VALUE".into(), Value::String("1".into()));
        let obs = Observation::make(&di, &props, Utc::now()).unwrap();

        let out = deliver
            .apply(PipelineEntity::Observations(vec![obs]))
            .unwrap();
        let PipelineEntity::Committed(committed) = out else {
            panic!("expected committed");
        };
        assert_eq!(committed[0].sequence(), 1);
        assert_eq!(deliver.delivered(), 1);
    }

    #[test]
    fn assets_and_commands_reach_the_contract() {
        let contract = Arc::new(TestContract::new());

        let deliver = DeliverAsset::new(contract.clone(), Some("uuid-1".into()));
        let asset = agent_types::Asset::new("T1", "CuttingTool", Utc::now(), "<tool/>");
        assert!(deliver
            .apply(PipelineEntity::Assets(vec![asset]))
            .is_none());
        assert_eq!(deliver.delivered(), 1);
        {
            let assets = contract.assets.lock();
            assert_eq!(assets[0].asset_id(), "T1");
            assert_eq!(assets[0].device_uuid(), Some("uuid-1"));
        }

        let commands = DeliverAssetCommand::new(contract.clone());
        assert!(commands
            .apply(PipelineEntity::AssetCommand(
                agent_types::AssetCommand::RemoveAsset {
                    asset_id: "T1".into()
                }
            ))
            .is_none());
        assert_eq!(contract.asset_commands.lock().len(), 1);
    }

    #[test]
    fn status_reaches_the_contract() {
        let contract = Arc::new(TestContract::new());
        let deliver = DeliverConnectionStatus::new(contract.clone(), "adapter-1".into());
        let _ = deliver.apply(PipelineEntity::ConnectionStatus(
            ConnectionStatus::Connected,
        ));
        assert_eq!(
            contract.statuses.lock().as_slice(),
            &[("adapter-1".to_string(), ConnectionStatus::Connected)]
        );
    }
}
