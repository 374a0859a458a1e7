//! Polymorphic entity model: named records of tagged values
//!
//! An [`Entity`] is a named record holding a mapping from property keys to
//! tagged [`Value`]s. Factories validate raw property maps against ordered
//! requirement lists, coercing types and accumulating per-property errors.

mod data_set;
mod factory;
mod requirement;
mod value;

pub use data_set::{DataSet, DataSetEntry, DataSetValue};
pub use factory::Factory;
pub use requirement::{Requirement, ValueType};
pub use value::{format_double, Value};

use std::collections::BTreeMap;

/// The property key holding an entity's primary payload.
pub const VALUE_KEY: &str = "VALUE";

/// A property map in key order.
pub type Properties = BTreeMap<String, Value>;

/// A named polymorphic record with typed properties.
///
/// Equality is structural. An optional ordering list controls presentation
/// order when the entity is rendered; it does not affect equality.
#[derive(Debug, Clone, Default)]
pub struct Entity {
    name: String,
    properties: Properties,
    order: Option<Vec<String>>,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Properties::new(),
            order: None,
        }
    }

    pub fn with_properties(name: impl Into<String>, properties: Properties) -> Self {
        Self {
            name: name.into(),
            properties,
            order: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: Value) {
        self.properties.insert(key.into(), value);
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// The entity's primary payload, when it represents a leaf.
    pub fn value(&self) -> Option<&Value> {
        self.properties.get(VALUE_KEY)
    }

    pub fn set_value(&mut self, value: Value) {
        self.properties.insert(VALUE_KEY.to_string(), value);
    }

    /// Typed string accessor; `None` when absent or not a string.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.properties.get(key) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn set_order(&mut self, order: Vec<String>) {
        self.order = Some(order);
    }

    /// Property keys in presentation order: the ordering list first, then
    /// any remaining keys in map order.
    pub fn ordered_keys(&self) -> Vec<&str> {
        match &self.order {
            None => self.properties.keys().map(String::as_str).collect(),
            Some(order) => {
                let mut keys: Vec<&str> = order
                    .iter()
                    .map(String::as_str)
                    .filter(|k| self.properties.contains_key(*k))
                    .collect();
                for k in self.properties.keys() {
                    if !order.iter().any(|o| o == k) {
                        keys.push(k);
                    }
                }
                keys
            }
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.properties == other.properties
    }
}
