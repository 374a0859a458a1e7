//! Applying declared unit conversions to samples

use agent_types::ObservationValue;

use crate::{GuardAction, PipelineEntity, Transform};

/// Converts sample values from native units using the data item's
/// converter. Events and conditions pass through untouched.
pub struct ConvertSample;

impl Transform for ConvertSample {
    fn name(&self) -> &'static str {
        "ConvertSample"
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

        let converted = observations
            .into_iter()
            .map(|obs| {
                let Some(data_item) = obs.data_item() else {
                    return obs;
                };
                let Some(conversion) = data_item.conversion() else {
                    return obs;
                };
                match obs.value() {
                    ObservationValue::Sample {
                        value: Some(v),
                        duration,
                        statistic,
                    } => obs.with_value(ObservationValue::Sample {
                        value: Some(conversion.convert(*v)),
                        duration: *duration,
                        statistic: statistic.clone(),
                    }),
                    ObservationValue::ThreeSpace { value: Some(v) } => {
                        obs.with_value(ObservationValue::ThreeSpace {
                            value: Some([
                                conversion.convert(v[0]),
                                conversion.convert(v[1]),
                                conversion.convert(v[2]),
                            ]),
                        })
                    }
                    ObservationValue::Timeseries {
                        count,
                        frequency,
                        values,
                    } if !values.is_empty() => obs.with_value(ObservationValue::Timeseries {
                        count: *count,
                        frequency: *frequency,
                        values: conversion.convert_vector(values),
                    }),
                    _ => obs,
                }
            })
            .collect();
        Some(PipelineEntity::Observations(converted))
    }
}
