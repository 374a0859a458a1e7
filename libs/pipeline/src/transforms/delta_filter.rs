//! Minimum-delta filtering for samples

use dashmap::DashMap;

use agent_types::ObservationValue;

use crate::{GuardAction, PipelineEntity, Transform};

/// Drops samples whose change from the last reported value is below the
/// data item's declared minimum delta. Unavailable transitions pass and
/// reset the stored value.
pub struct DeltaFilter {
    last_values: DashMap<String, f64>,
}

impl DeltaFilter {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            last_values: DashMap::new(),
        }
    }
}

impl Transform for DeltaFilter {
    fn name(&self) -> &'static str {
        "DeltaFilter"
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
            .filter(|obs| {
                let Some(data_item) = obs.data_item() else {
                    return true;
                };
                let Some(delta) = data_item.filter().minimum_delta else {
                    return true;
                };
                match obs.value() {
                    ObservationValue::Sample {
                        value: Some(value), ..
                    } => match self.last_values.get(obs.data_item_id()) {
                        Some(last) if (value - *last).abs() < delta => false,
                        _ => {
                            self.last_values
                                .insert(obs.data_item_id().to_string(), *value);
                            true
                        }
                    },
                    _ => {
                        self.last_values.remove(obs.data_item_id());
                        true
                    }
                }
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

    fn load(contract: &TestContract, value: &str) -> PipelineEntity {
        let di = contract.device.data_item("load").unwrap();
        let mut props = Properties::new();
        props.insert("VALUE".into(), Value::String(value.into()));
        PipelineEntity::Observations(vec![Observation::make(&di, &props, Utc::now()).unwrap()])
    }

    #[test]
    fn small_changes_are_dropped() {
        // The load item declares a minimum delta of 0.5.
        let contract = TestContract::new();
        let filter = DeltaFilter::new();

        assert!(filter.apply(load(&contract, "10")).is_some());
        assert!(filter.apply(load(&contract, "10.2")).is_none());
        assert!(filter.apply(load(&contract, "10.6")).is_some());
    }

    #[test]
    fn unavailable_resets_the_stored_value() {
        let contract = TestContract::new();
        let filter = DeltaFilter::new();

        assert!(filter.apply(load(&contract, "10")).is_some());
        assert!(filter.apply(load(&contract, "UNAVAILABLE")).is_some());
        // After a reset even a tiny change passes.
        assert!(filter.apply(load(&contract, "10.1")).is_some());
    }
}
