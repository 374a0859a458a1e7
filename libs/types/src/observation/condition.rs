//! Condition chain operations
//!
//! A condition observation may point to the previous active condition for
//! the same data item; the chain is the set of currently-active conditions.
//! Chains are copy-on-write: every mutating operation returns a new chain
//! and never touches the input observations.
//!
//! Invariants:
//! - at most one entry per native code
//! - a NORMAL with an empty code clears the whole chain
//! - a NORMAL with a specific code removes only that entry

use std::sync::Arc;

use super::{ConditionLevel, ConditionState, Observation, ObservationPtr};

/// Walk the chain looking for the entry with `code`.
pub fn find(head: &ObservationPtr, code: &str) -> Option<ObservationPtr> {
    let mut current = Some(head.clone());
    while let Some(obs) = current {
        let state = obs.condition()?;
        if state.code == code {
            return Some(obs);
        }
        current = state.prev.clone();
    }
    None
}

/// Number of entries in the chain.
pub fn len(head: &ObservationPtr) -> usize {
    let mut count = 0;
    let mut current = Some(head.clone());
    while let Some(obs) = current {
        count += 1;
        current = obs.condition().and_then(|c| c.prev.clone());
    }
    count
}

/// Collect the chain head-first into a list.
pub fn to_list(head: &ObservationPtr) -> Vec<ObservationPtr> {
    let mut out = Vec::new();
    let mut current = Some(head.clone());
    while let Some(obs) = current {
        current = obs.condition().and_then(|c| c.prev.clone());
        out.push(obs);
    }
    out
}

/// A copy of `obs` chained in front of `prev`.
pub fn append_to(obs: &Observation, prev: Option<ObservationPtr>) -> Observation {
    let mut state = obs
        .condition()
        .expect("append_to requires a condition observation")
        .clone();
    state.prev = prev;
    obs.with_value(super::ObservationValue::Condition(state))
}

/// Rebuild the chain without the entry whose code is `code`.
///
/// Returns `None` when the removed entry was the only one. The surviving
/// entries are deep-copied so the original chain is left intact.
pub fn deep_copy_and_remove(head: &ObservationPtr, code: &str) -> Option<ObservationPtr> {
    let survivors: Vec<ObservationPtr> = to_list(head)
        .into_iter()
        .filter(|obs| obs.condition().map(|c| c.code != code).unwrap_or(false))
        .collect();

    rebuild(survivors)
}

/// Deep-copy the chain as-is.
pub fn deep_copy(head: &ObservationPtr) -> ObservationPtr {
    rebuild(to_list(head)).expect("chain cannot be empty")
}

fn rebuild(entries: Vec<ObservationPtr>) -> Option<ObservationPtr> {
    let mut prev: Option<ObservationPtr> = None;
    for obs in entries.into_iter().rev() {
        prev = Some(Arc::new(append_to(&obs, prev)));
    }
    prev
}

/// A copy of `from` reduced to an empty-code NORMAL, used when clearing the
/// last active condition.
pub fn make_normal(from: &Observation) -> Observation {
    from.with_value(super::ObservationValue::Condition(ConditionState {
        level: ConditionLevel::Normal,
        code: String::new(),
        qualifier: None,
        native_severity: None,
        text: None,
        prev: None,
    }))
}

/// True when the chain is a single empty-code NORMAL (the idle state).
pub fn is_empty_normal(head: &ObservationPtr) -> bool {
    match head.condition() {
        Some(state) => {
            state.level == ConditionLevel::Normal && state.code.is_empty() && state.prev.is_none()
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DataItem, DataItemCategory};
    use crate::entity::{Properties, Value};
    use chrono::Utc;

    fn condition_item() -> Arc<DataItem> {
        Arc::new(
            DataItem::builder("c1", DataItemCategory::Condition)
                .item_type("SYSTEM")
                .build()
                .unwrap(),
        )
    }

    fn fault(di: &Arc<DataItem>, code: &str, text: &str) -> ObservationPtr {
        let mut props = Properties::new();
        props.insert("level".into(), Value::String("FAULT".into()));
        props.insert("nativeCode".into(), Value::String(code.into()));
        props.insert("VALUE".into(), Value::String(text.into()));
        Arc::new(Observation::make(di, &props, Utc::now()).unwrap())
    }

    #[test]
    fn chains_have_one_entry_per_code() {
        let di = condition_item();
        let a = fault(&di, "A", "overheat");
        let b = Arc::new(append_to(&fault(&di, "B", "jam"), Some(a.clone())));

        assert_eq!(len(&b), 2);
        assert_eq!(find(&b, "A").unwrap().condition().unwrap().code, "A");
        assert_eq!(find(&b, "B").unwrap().condition().unwrap().code, "B");
        assert!(find(&b, "C").is_none());
    }

    #[test]
    fn remove_is_copy_on_write() {
        let di = condition_item();
        let a = fault(&di, "A", "overheat");
        let b = Arc::new(append_to(&fault(&di, "B", "jam"), Some(a.clone())));

        let without_a = deep_copy_and_remove(&b, "A").unwrap();
        assert_eq!(len(&without_a), 1);
        assert_eq!(without_a.condition().unwrap().code, "B");

        // Original chain untouched.
        assert_eq!(len(&b), 2);
    }

    #[test]
    fn removing_the_only_entry_empties_the_chain() {
        let di = condition_item();
        let a = fault(&di, "A", "overheat");
        assert!(deep_copy_and_remove(&a, "A").is_none());
    }

    #[test]
    fn empty_normal_is_recognized() {
        let di = condition_item();
        let a = fault(&di, "A", "overheat");
        let normal = Arc::new(make_normal(&a));
        assert!(is_empty_normal(&normal));
        assert!(!is_empty_normal(&a));
    }
}
