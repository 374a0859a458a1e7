//! Upper-casing event values into the controlled vocabulary

use agent_types::entity::Value;
use agent_types::ObservationValue;

use crate::{GuardAction, PipelineEntity, Transform};

/// Upper-cases string event values; adapters frequently send lower-case
/// vocabulary words.
pub struct UpcaseValue;

impl Transform for UpcaseValue {
    fn name(&self) -> &'static str {
        "UpcaseValue"
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

        let upcased = observations
            .into_iter()
            .map(|obs| match obs.value() {
                ObservationValue::Event(Value::String(s)) => {
                    let value = ObservationValue::Event(Value::String(s.to_uppercase()));
                    obs.with_value(value)
                }
                _ => obs,
            })
            .collect();
        Some(PipelineEntity::Observations(upcased))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use agent_types::device::{DataItem, DataItemCategory};
    use agent_types::entity::Properties;
    use agent_types::Observation;
    use chrono::Utc;

    #[test]
    fn string_events_are_upcased() {
        let di = Arc::new(
            DataItem::builder("mode", DataItemCategory::Event)
                .item_type("CONTROLLER_MODE")
                .build()
                .unwrap(),
        );
        let mut props = Properties::new();
        props.insert("VALUE".into(), Value::String("automatic".into()));
        let obs = Observation::make(&di, &props, Utc::now()).unwrap();

        let out = UpcaseValue
            .apply(PipelineEntity::Observations(vec![obs]))
            .unwrap();
        let PipelineEntity::Observations(obs) = out else {
            panic!("expected observations");
        };
        assert_eq!(obs[0].value_text(), "AUTOMATIC");
    }
}
