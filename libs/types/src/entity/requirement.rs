//! Property requirements: the typed constraints a factory enforces

use std::sync::Arc;

use regex::Regex;

use super::factory::Factory;
use super::value::Value;
use crate::error::PropertyError;

/// The type a requirement coerces its property to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Int,
    Double,
    Bool,
    Vector,
    DataSet,
    Table,
    Timestamp,
    Entity,
    EntityList,
}

/// A declared property of an entity: name, value type, multiplicity and
/// optional constraints.
#[derive(Debug, Clone)]
pub struct Requirement {
    name: String,
    value_type: ValueType,
    lower: usize,
    upper: usize,
    pattern: Option<Regex>,
    vocabulary: Option<Vec<String>>,
    vector_size: Option<usize>,
    sub_factory: Option<Arc<Factory>>,
}

impl Requirement {
    pub fn new(name: impl Into<String>, value_type: ValueType, required: bool) -> Self {
        Self {
            name: name.into(),
            value_type,
            lower: usize::from(required),
            upper: 1,
            pattern: None,
            vocabulary: None,
            vector_size: None,
            sub_factory: None,
        }
    }

    /// A requirement on a list of nested entities with the given multiplicity.
    pub fn list(
        name: impl Into<String>,
        lower: usize,
        upper: usize,
        sub_factory: Arc<Factory>,
    ) -> Self {
        Self {
            name: name.into(),
            value_type: ValueType::EntityList,
            lower,
            upper,
            pattern: None,
            vocabulary: None,
            vector_size: None,
            sub_factory: Some(sub_factory),
        }
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        // Patterns are authored with the factories; a bad one is a
        // programming error, not input.
        self.pattern = Some(Regex::new(pattern).expect("invalid requirement pattern"));
        self
    }

    pub fn with_vocabulary<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vocabulary = Some(words.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_vector_size(mut self, size: usize) -> Self {
        self.vector_size = Some(size);
        self
    }

    pub fn with_sub_factory(mut self, factory: Arc<Factory>) -> Self {
        self.sub_factory = Some(factory);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn is_required(&self) -> bool {
        self.lower > 0
    }

    pub fn multiplicity(&self) -> (usize, usize) {
        (self.lower, self.upper)
    }

    pub fn sub_factory(&self) -> Option<&Arc<Factory>> {
        self.sub_factory.as_ref()
    }

    /// Coerce `value` to this requirement's type and check its constraints.
    pub fn check(&self, value: &Value) -> Result<Value, PropertyError> {
        let coerced = self.coerce(value)?;

        if let Some(pattern) = &self.pattern {
            let text = coerced.to_text();
            if !pattern.is_match(&text) {
                return Err(PropertyError::Pattern {
                    property: self.name.clone(),
                    value: text,
                    pattern: pattern.as_str().to_string(),
                });
            }
        }

        if let Some(vocabulary) = &self.vocabulary {
            let text = coerced.to_text();
            if !vocabulary.iter().any(|w| w == &text) {
                return Err(PropertyError::Vocabulary {
                    property: self.name.clone(),
                    value: text,
                });
            }
        }

        if let (Some(expected), Value::Vector(v)) = (self.vector_size, &coerced) {
            if v.len() != expected {
                return Err(PropertyError::VectorSize {
                    property: self.name.clone(),
                    count: v.len(),
                    expected,
                });
            }
        }

        if let Value::EntityList(list) = &coerced {
            if list.len() < self.lower || list.len() > self.upper {
                return Err(PropertyError::Multiplicity {
                    property: self.name.clone(),
                    count: list.len(),
                    max: self.upper,
                });
            }
        }

        Ok(coerced)
    }

    fn coerce(&self, value: &Value) -> Result<Value, PropertyError> {
        let mismatch = |value: &Value, expected: &'static str| PropertyError::Conversion {
            property: self.name.clone(),
            value: value.to_text(),
            expected,
        };

        match self.value_type {
            ValueType::String => Ok(Value::String(value.to_text())),
            ValueType::Int => value.to_int(&self.name).map(Value::Int),
            ValueType::Double => value.to_double(&self.name).map(Value::Double),
            ValueType::Bool => value.to_bool(&self.name).map(Value::Bool),
            ValueType::Vector => value.to_vector(&self.name).map(Value::Vector),
            ValueType::Timestamp => match value {
                Value::Timestamp(ts) => Ok(Value::Timestamp(*ts)),
                Value::String(s) => s
                    .parse::<chrono::DateTime<chrono::Utc>>()
                    .map(Value::Timestamp)
                    .map_err(|_| mismatch(value, "TIMESTAMP")),
                _ => Err(mismatch(value, "TIMESTAMP")),
            },
            ValueType::DataSet | ValueType::Table => match value {
                Value::DataSet(ds) => Ok(Value::DataSet(ds.clone())),
                Value::String(s) => {
                    super::data_set::DataSet::parse(s, self.value_type == ValueType::Table)
                        .map(Value::DataSet)
                        .ok_or_else(|| mismatch(value, "DATA_SET"))
                }
                _ => Err(mismatch(value, "DATA_SET")),
            },
            ValueType::Entity => match value {
                Value::Entity(_) => Ok(value.clone()),
                _ => Err(mismatch(value, "ENTITY")),
            },
            ValueType::EntityList => match value {
                Value::EntityList(_) => Ok(value.clone()),
                Value::Entity(e) => Ok(Value::EntityList(vec![(**e).clone()])),
                _ => Err(mismatch(value, "ENTITY_LIST")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_and_checks_pattern() {
        let req = Requirement::new("nativeCode", ValueType::String, false).with_pattern("^[A-Z]+$");
        assert!(req.check(&Value::String("FAULT".into())).is_ok());
        assert!(matches!(
            req.check(&Value::String("fault".into())),
            Err(PropertyError::Pattern { .. })
        ));
    }

    #[test]
    fn vocabulary_is_enforced_after_coercion() {
        let req = Requirement::new("level", ValueType::String, true)
            .with_vocabulary(["NORMAL", "WARNING", "FAULT"]);
        assert!(req.check(&Value::String("WARNING".into())).is_ok());
        assert!(matches!(
            req.check(&Value::String("BROKEN".into())),
            Err(PropertyError::Vocabulary { .. })
        ));
    }

    #[test]
    fn vector_size_is_checked() {
        let req = Requirement::new("position", ValueType::Vector, true).with_vector_size(3);
        assert!(req.check(&Value::String("1 2 3".into())).is_ok());
        assert!(matches!(
            req.check(&Value::String("1 2".into())),
            Err(PropertyError::VectorSize { .. })
        ));
    }
}
