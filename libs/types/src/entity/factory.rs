//! Entity factories: ordered requirement lists that validate property maps

use super::requirement::Requirement;
use super::{Entity, Properties};
use crate::error::{ErrorList, PropertyError};

/// Validates raw properties into an [`Entity`].
///
/// A factory performs type coercions first, then checks multiplicities and
/// constraints, and rejects unknown properties unless it represents a list.
#[derive(Debug, Clone, Default)]
pub struct Factory {
    requirements: Vec<Requirement>,
    is_list: bool,
}

impl Factory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_requirements<I>(requirements: I) -> Self
    where
        I: IntoIterator<Item = Requirement>,
    {
        Self {
            requirements: requirements.into_iter().collect(),
            is_list: false,
        }
    }

    /// List factories accept arbitrary extra properties.
    pub fn list(mut self) -> Self {
        self.is_list = true;
        self
    }

    pub fn add(&mut self, requirement: Requirement) {
        self.requirements.push(requirement);
    }

    pub fn requirement(&self, name: &str) -> Option<&Requirement> {
        self.requirements.iter().find(|r| r.name() == name)
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Validate `properties` and build the entity named `name`.
    ///
    /// Errors accumulate per property; the returned entity carries every
    /// property that validated even when the result is an error list, so
    /// callers can surface partial parses.
    pub fn make(&self, name: &str, properties: Properties) -> (Entity, ErrorList) {
        let mut entity = Entity::new(name);
        let mut errors = ErrorList::new();

        for (key, value) in &properties {
            match self.requirement(key) {
                Some(requirement) => match requirement.check(value) {
                    Ok(coerced) => entity.set_property(key.clone(), coerced),
                    Err(e) => errors.push(e),
                },
                None if self.is_list => entity.set_property(key.clone(), value.clone()),
                None => errors.push(PropertyError::Unknown {
                    property: key.clone(),
                    entity: name.to_string(),
                }),
            }
        }

        for requirement in &self.requirements {
            if requirement.is_required() && !properties.contains_key(requirement.name()) {
                errors.push(PropertyError::Missing {
                    property: requirement.name().to_string(),
                });
            }
        }

        entity.set_order(
            self.requirements
                .iter()
                .map(|r| r.name().to_string())
                .collect(),
        );

        (entity, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Value, ValueType};

    fn condition_factory() -> Factory {
        Factory::with_requirements([
            Requirement::new("level", ValueType::String, true).with_vocabulary([
                "NORMAL",
                "WARNING",
                "FAULT",
                "UNAVAILABLE",
            ]),
            Requirement::new("nativeCode", ValueType::String, false),
            Requirement::new("nativeSeverity", ValueType::String, false),
            Requirement::new("qualifier", ValueType::String, false),
            Requirement::new("VALUE", ValueType::String, false),
        ])
    }

    #[test]
    fn makes_valid_entity_in_requirement_order() {
        let factory = condition_factory();
        let mut props = Properties::new();
        props.insert("level".into(), Value::String("FAULT".into()));
        props.insert("nativeCode".into(), Value::String("A".into()));

        let (entity, errors) = factory.make("Condition", props);
        assert!(errors.is_empty());
        assert_eq!(entity.get_string("level"), Some("FAULT"));
        assert_eq!(entity.ordered_keys()[0], "level");
    }

    #[test]
    fn unknown_property_is_rejected_and_partial_parse_kept() {
        let factory = condition_factory();
        let mut props = Properties::new();
        props.insert("level".into(), Value::String("NORMAL".into()));
        props.insert("bogus".into(), Value::String("x".into()));

        let (entity, errors) = factory.make("Condition", props);
        assert_eq!(errors.len(), 1);
        assert_eq!(entity.get_string("level"), Some("NORMAL"));
        assert!(!entity.has_property("bogus"));
    }

    #[test]
    fn missing_required_property_is_an_error() {
        let factory = condition_factory();
        let (_, errors) = factory.make("Condition", Properties::new());
        assert!(errors
            .iter()
            .any(|e| matches!(e, PropertyError::Missing { property } if property == "level")));
    }
}
