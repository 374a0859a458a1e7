//! Dropping duplicate observations against the latest checkpoint

use std::sync::Arc;

use crate::contract::PipelineContract;
use crate::{GuardAction, PipelineEntity, Transform};

/// Queries the agent's latest checkpoint for each observation; duplicates
/// are dropped and data sets are reduced to their changed entries.
pub struct DuplicateFilter {
    contract: Arc<dyn PipelineContract>,
}

impl DuplicateFilter {
    pub fn new(contract: Arc<dyn PipelineContract>) -> Self {
        Self { contract }
    }
}

impl Transform for DuplicateFilter {
    fn name(&self) -> &'static str {
        "DuplicateFilter"
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

        let filtered: Vec<_> = observations
            .into_iter()
            .filter_map(|obs| {
                self.contract
                    .check_duplicate(&Arc::new(obs))
                    .map(|kept| (*kept).clone())
            })
            .collect();

        if filtered.is_empty() {
            None
        } else {
            Some(PipelineEntity::Observations(filtered))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::test_support::TestContract;
    use agent_types::entity::{Properties, Value};
    use agent_types::Observation;
    use chrono::Utc;

    fn sample(contract: &TestContract, id: &str, value: &str) -> Observation {
        let di = contract.device.data_item(id).unwrap();
        let mut props = Properties::new();
        props.insert("VALUE".into(), Value::String(value.into()));
        Observation::make(&di, &props, Utc::now()).unwrap()
    }

    #[test]
    fn second_identical_observation_is_dropped() {
        let contract = Arc::new(TestContract::new());
        let filter = DuplicateFilter::new(contract.clone());

        let first = filter
            .apply(PipelineEntity::Observations(vec![sample(
                &contract, "X", "1",
            )]))
            .unwrap();
        let PipelineEntity::Observations(first) = first else {
            panic!("expected observations");
        };
        for obs in first {
            contract.deliver_observation(obs);
        }

        assert!(filter
            .apply(PipelineEntity::Observations(vec![sample(
                &contract, "X", "1",
            )]))
            .is_none());
        assert!(filter
            .apply(PipelineEntity::Observations(vec![sample(
                &contract, "X", "2",
            )]))
            .is_some());
    }
}
