//! Checkpoints: the latest observation per data item at a point in the
//! sequence
//!
//! Folding an observation in applies the merge rules for its category:
//! conditions chain with one entry per native code, data sets merge
//! entry-wise, everything else replaces. A checkpoint may carry a filter
//! set restricting which data items it tracks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use agent_types::observation::condition;
use agent_types::{ConditionLevel, Observation, ObservationPtr, ObservationValue};

/// A set of data item ids used to restrict a checkpoint or buffer query.
pub type FilterSet = HashSet<String>;

/// A mapping from data item id to its latest observation.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    observations: HashMap<String, ObservationPtr>,
    filter: Option<FilterSet>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// A filtered copy. When `filter` is `None` the source's own filter is
    /// kept.
    pub fn filtered_copy(source: &Checkpoint, filter: Option<FilterSet>) -> Self {
        let filter = filter.or_else(|| source.filter.clone());
        let mut copy = Self {
            observations: HashMap::new(),
            filter,
        };
        for (id, obs) in &source.observations {
            if copy.accepts(id) {
                copy.observations.insert(id.clone(), obs.clone());
            }
        }
        copy
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn get(&self, data_item_id: &str) -> Option<&ObservationPtr> {
        self.observations.get(data_item_id)
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    fn accepts(&self, data_item_id: &str) -> bool {
        match &self.filter {
            Some(filter) => filter.contains(data_item_id),
            None => true,
        }
    }

    /// Fold an observation in, applying the category merge rules.
    pub fn add_observation(&mut self, obs: &ObservationPtr) {
        if obs.is_orphan() || !self.accepts(obs.data_item_id()) {
            return;
        }

        let id = obs.data_item_id().to_string();
        let merged = match self.observations.get(&id) {
            None => obs.clone(),
            Some(old) => match obs.value() {
                ObservationValue::Condition(_) => merge_condition(obs, old),
                ObservationValue::DataSetEvent { .. } | ObservationValue::TableEvent { .. } => {
                    merge_data_set(obs, old)
                }
                _ => obs.clone(),
            },
        };
        self.observations.insert(id, merged);
    }

    /// The checkpoint's observations, conditions expanded chain-first.
    pub fn observations(&self, filter: Option<&FilterSet>) -> Vec<ObservationPtr> {
        let mut out = Vec::with_capacity(self.observations.len());
        for (id, obs) in &self.observations {
            if let Some(filter) = filter {
                if !filter.contains(id) {
                    continue;
                }
            }
            if obs.is_orphan() {
                continue;
            }
            if obs.condition().is_some() {
                out.extend(condition::to_list(obs));
            } else {
                out.push(obs.clone());
            }
        }
        out
    }

    /// Drop entries whose data item id is not in `map` and re-point the
    /// survivors, after a device-model swap.
    pub fn update_data_items(
        &mut self,
        map: &HashMap<String, Arc<agent_types::DataItem>>,
    ) {
        let mut updated = HashMap::with_capacity(self.observations.len());
        for (id, obs) in self.observations.drain() {
            if let Some(rebound) = obs.rebind(map) {
                updated.insert(id, Arc::new(rebound));
            }
        }
        self.observations = updated;
    }

    /// Check an incoming observation against the checkpoint's state.
    ///
    /// Returns the observation to forward — possibly reduced, for data
    /// sets — or `None` when it is a duplicate.
    pub fn check_duplicate(&self, obs: &ObservationPtr) -> Option<ObservationPtr> {
        let data_item = obs.data_item()?;
        let old = match self.observations.get(obs.data_item_id()) {
            Some(old) => old,
            None => return Some(obs.clone()),
        };

        // Unavailable transitions always pass; unavailable-to-unavailable
        // is dropped.
        if obs.is_unavailable() != old.is_unavailable() {
            return Some(obs.clone());
        }
        if obs.is_unavailable() {
            return None;
        }

        if data_item.is_condition() {
            return check_condition_duplicate(obs, old);
        }

        if data_item.is_discrete() {
            return Some(obs.clone());
        }

        if data_item.is_data_set() {
            return data_set_difference(obs, old);
        }

        if obs.value_eq(old) {
            None
        } else {
            Some(obs.clone())
        }
    }
}

fn check_condition_duplicate(
    obs: &ObservationPtr,
    old: &ObservationPtr,
) -> Option<ObservationPtr> {
    let cond = obs.condition()?;
    let old_cond = old.condition()?;

    // A normal resetting all conditions duplicates only an already-idle
    // chain.
    if cond.level == ConditionLevel::Normal && cond.code.is_empty() {
        if old_cond.level == ConditionLevel::Normal && old_cond.code.is_empty() {
            return None;
        }
        return Some(obs.clone());
    }

    if let Some(existing) = condition::find(old, &cond.code) {
        let e = existing.condition()?;
        if cond.level != e.level
            || cond.text != e.text
            || cond.qualifier != e.qualifier
            || cond.native_severity != e.native_severity
        {
            return Some(obs.clone());
        }
        return None;
    }

    if cond.level == ConditionLevel::Normal {
        // A code-specific normal with no matching active condition.
        return None;
    }

    Some(obs.clone())
}

/// Diff an incoming data set against the checkpoint's current set.
fn data_set_difference(obs: &ObservationPtr, old: &ObservationPtr) -> Option<ObservationPtr> {
    let set = obs.data_set()?;
    if set.is_empty() || obs.reset_triggered().is_some() {
        return Some(obs.clone());
    }
    let old_set = old.data_set()?;

    match set.difference(old_set) {
        None => None,
        Some(reduced) if &reduced == set => Some(obs.clone()),
        Some(reduced) => {
            let value = match obs.value() {
                ObservationValue::TableEvent {
                    reset_triggered, ..
                } => ObservationValue::TableEvent {
                    set: reduced,
                    reset_triggered: reset_triggered.clone(),
                },
                _ => ObservationValue::DataSetEvent {
                    set: reduced,
                    reset_triggered: obs.reset_triggered().map(str::to_string),
                },
            };
            Some(Arc::new(obs.with_value(value)))
        }
    }
}

fn merge_condition(obs: &ObservationPtr, old: &ObservationPtr) -> ObservationPtr {
    let cond = match obs.condition() {
        Some(c) => c,
        None => return obs.clone(),
    };
    let old_cond = match old.condition() {
        Some(c) => c,
        None => return obs.clone(),
    };

    let both_active = cond.level != ConditionLevel::Normal
        && cond.level != ConditionLevel::Unavailable
        && old_cond.level != ConditionLevel::Normal
        && old_cond.level != ConditionLevel::Unavailable;

    if both_active {
        // Replace any active entry with the same code, then chain.
        let rest = if condition::find(old, &cond.code).is_some() {
            condition::deep_copy_and_remove(old, &cond.code)
        } else {
            Some(old.clone())
        };
        return Arc::new(condition::append_to(obs, rest));
    }

    if cond.level == ConditionLevel::Normal && !cond.code.is_empty() {
        if condition::find(old, &cond.code).is_some() {
            // Clear one condition by removing it from the chain; when it
            // was the last one an empty-code normal takes its place.
            return match condition::deep_copy_and_remove(old, &cond.code) {
                Some(remaining) => remaining,
                None => Arc::new(condition::make_normal(obs)),
            };
        }
        // No active condition with this code; keep the event as-is.
    }

    obs.clone()
}

fn merge_data_set(obs: &ObservationPtr, old: &ObservationPtr) -> ObservationPtr {
    if obs.is_unavailable() || old.is_unavailable() || obs.reset_triggered().is_some() {
        return obs.clone();
    }

    let (Some(incoming), Some(existing)) = (obs.data_set(), old.data_set()) else {
        return obs.clone();
    };

    let mut merged = existing.clone();
    merged.merge(incoming);

    let value = match obs.value() {
        ObservationValue::TableEvent {
            reset_triggered, ..
        } => ObservationValue::TableEvent {
            set: merged,
            reset_triggered: reset_triggered.clone(),
        },
        _ => ObservationValue::DataSetEvent {
            set: merged,
            reset_triggered: obs.reset_triggered().map(str::to_string),
        },
    };
    Arc::new(obs.with_value(value))
}
