//! Per-data-item rate limiting with delayed emission
//!
//! For each data item with a period `P`: an observation arriving at least
//! `P` after the last emission passes immediately; otherwise it becomes
//! the pending value for a timer firing at `t₀ + P`, replacing any value
//! already pending. Ordering within a single data item is preserved;
//! across data items the delayed emission may reorder by at most one
//! period.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use agent_types::Observation;

use crate::contract::PipelineContract;
use crate::{GuardAction, PipelineEntity, Transform};

struct PeriodState {
    last_emit: DateTime<Utc>,
    pending: Option<Observation>,
    timer: Option<JoinHandle<()>>,
}

/// Rate-limits observations per data item to one per declared period.
pub struct PeriodFilter {
    contract: Arc<dyn PipelineContract>,
    state: Arc<Mutex<HashMap<String, PeriodState>>>,
}

impl PeriodFilter {
    pub fn new(contract: Arc<dyn PipelineContract>) -> Self {
        Self {
            contract,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn admit(&self, obs: Observation, period: f64) -> Option<Observation> {
        let id = obs.data_item_id().to_string();
        let timestamp = obs.timestamp();
        let mut state = self.state.lock();

        match state.get_mut(&id) {
            None => {
                state.insert(
                    id,
                    PeriodState {
                        last_emit: timestamp,
                        pending: None,
                        timer: None,
                    },
                );
                Some(obs)
            }
            Some(entry) => {
                let elapsed =
                    (timestamp - entry.last_emit).num_milliseconds() as f64 / 1000.0;
                if elapsed >= period {
                    entry.last_emit = timestamp;
                    entry.pending = None;
                    if let Some(timer) = entry.timer.take() {
                        timer.abort();
                    }
                    Some(obs)
                } else {
                    entry.pending = Some(obs);
                    if entry.timer.is_none() {
                        let fire_at = entry.last_emit
                            + chrono::Duration::milliseconds((period * 1000.0) as i64);
                        entry.timer = self.schedule(id, fire_at);
                    }
                    None
                }
            }
        }
    }

    fn schedule(&self, id: String, fire_at: DateTime<Utc>) -> Option<JoinHandle<()>> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return None;
        };
        let state = self.state.clone();
        let contract = self.contract.clone();

        Some(handle.spawn(async move {
            let delay = (fire_at - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(delay).await;

            let pending = {
                let mut state = state.lock();
                match state.get_mut(&id) {
                    Some(entry) => {
                        entry.timer = None;
                        entry.last_emit = fire_at;
                        entry.pending.take()
                    }
                    None => None,
                }
            };
            if let Some(obs) = pending {
                contract.deliver_observation(obs);
            }
        }))
    }
}

impl Transform for PeriodFilter {
    fn name(&self) -> &'static str {
        "PeriodFilter"
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

        let mut admitted = Vec::new();
        for obs in observations {
            let period = obs.data_item().and_then(|di| di.filter().period);
            match period {
                Some(period) if period > 0.0 => {
                    if let Some(obs) = self.admit(obs, period) {
                        admitted.push(obs);
                    }
                }
                _ => admitted.push(obs),
            }
        }

        if admitted.is_empty() {
            None
        } else {
            Some(PipelineEntity::Observations(admitted))
        }
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        for entry in state.values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            entry.pending = None;
        }
    }
}

impl Drop for PeriodFilter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::test_support::TestContract;
    use agent_types::entity::{Properties, Value};
    use chrono::Duration;

    fn temp_at(contract: &TestContract, value: f64, at: DateTime<Utc>) -> PipelineEntity {
        // The temp item declares a ten second period.
        let di = contract.device.data_item("temp").unwrap();
        let mut props = Properties::new();
        props.insert("VALUE".into(), Value::Double(value));
        PipelineEntity::Observations(vec![Observation::make(&di, &props, at).unwrap()])
    }

    #[tokio::test]
    async fn first_observation_passes_immediately() {
        let contract = Arc::new(TestContract::new());
        let filter = PeriodFilter::new(contract.clone());
        assert!(filter.apply(temp_at(&contract, 1.0, Utc::now())).is_some());
    }

    #[tokio::test]
    async fn observations_beyond_the_period_pass() {
        let contract = Arc::new(TestContract::new());
        let filter = PeriodFilter::new(contract.clone());
        let t0 = Utc::now();

        assert!(filter.apply(temp_at(&contract, 1.0, t0)).is_some());
        assert!(filter
            .apply(temp_at(&contract, 2.0, t0 + Duration::seconds(11)))
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_observations_are_held_and_the_last_is_emitted() {
        let contract = Arc::new(TestContract::new());
        let filter = PeriodFilter::new(contract.clone());
        let t0 = Utc::now();

        assert!(filter.apply(temp_at(&contract, 1.0, t0)).is_some());
        assert!(filter
            .apply(temp_at(&contract, 2.0, t0 + Duration::seconds(1)))
            .is_none());
        // A newer value replaces the scheduled one.
        assert!(filter
            .apply(temp_at(&contract, 3.0, t0 + Duration::seconds(2)))
            .is_none());

        tokio::time::sleep(std::time::Duration::from_secs(11)).await;

        let latest = contract.latest();
        let obs = latest.get("temp").expect("delayed value delivered");
        assert_eq!(obs.value_text(), "3");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_timers() {
        let contract = Arc::new(TestContract::new());
        let filter = PeriodFilter::new(contract.clone());
        let t0 = Utc::now();

        let _ = filter.apply(temp_at(&contract, 1.0, t0));
        let _ = filter.apply(temp_at(&contract, 2.0, t0 + Duration::seconds(1)));
        filter.stop();

        tokio::time::sleep(std::time::Duration::from_secs(12)).await;
        assert!(contract.latest().get("temp").is_none());
    }
}
