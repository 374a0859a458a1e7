//! Error types for entity construction and property validation

use thiserror::Error;

/// Result type alias for entity operations
pub type Result<T> = std::result::Result<T, EntityError>;

/// A malformed entity: violates its factory's requirements.
///
/// Recovered at parse boundaries; the entity is logged and dropped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EntityError {
    /// No factory is registered for the entity name
    #[error("No factory for entity '{name}'")]
    UnknownEntity {
        /// The unrecognized entity name
        name: String,
    },

    /// One or more properties violated their requirements
    #[error("Entity '{name}' failed validation: {errors}")]
    Invalid {
        /// The entity that failed
        name: String,
        /// Accumulated property errors
        errors: ErrorList,
    },

    /// The entity references a data item that no longer resolves
    #[error("Data item '{id}' not found")]
    UnknownDataItem {
        /// The unresolved data item id
        id: String,
    },

    /// A value was observed for a data item of an incompatible category
    #[error("Value for '{id}' is incompatible with its data item: {reason}")]
    IncompatibleValue {
        /// The data item id
        id: String,
        /// Why the value cannot be observed
        reason: String,
    },
}

/// A single property violating its requirement.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PropertyError {
    /// The value could not be coerced to the required type
    #[error("Property '{property}': cannot convert '{value}' to {expected}")]
    Conversion {
        property: String,
        value: String,
        expected: &'static str,
    },

    /// A required property is missing
    #[error("Property '{property}' is required")]
    Missing { property: String },

    /// The property occurred more often than its multiplicity allows
    #[error("Property '{property}' occurs {count} times, at most {max} allowed")]
    Multiplicity {
        property: String,
        count: usize,
        max: usize,
    },

    /// The value did not match the requirement's pattern
    #[error("Property '{property}': '{value}' does not match pattern '{pattern}'")]
    Pattern {
        property: String,
        value: String,
        pattern: String,
    },

    /// The value is not in the controlled vocabulary
    #[error("Property '{property}': '{value}' is not an allowed value")]
    Vocabulary { property: String, value: String },

    /// A vector value has the wrong number of elements
    #[error("Property '{property}': vector has {count} elements, expected {expected}")]
    VectorSize {
        property: String,
        count: usize,
        expected: usize,
    },

    /// The property is not declared by the factory
    #[error("Property '{property}' is not declared for entity '{entity}'")]
    Unknown { property: String, entity: String },
}

/// Accumulated property errors riding alongside successfully-parsed parts.
///
/// Surfaced to REST/WebSocket clients on request errors and logged on
/// adapter ingest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorList {
    errors: Vec<PropertyError>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: PropertyError) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, other: ErrorList) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyError> {
        self.errors.iter()
    }

    pub fn into_result<T>(self, ok: T, name: &str) -> Result<T> {
        if self.is_empty() {
            Ok(ok)
        } else {
            Err(EntityError::Invalid {
                name: name.to_string(),
                errors: self,
            })
        }
    }
}

impl std::fmt::Display for ErrorList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for e in &self.errors {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}", e)?;
            first = false;
        }
        Ok(())
    }
}

impl From<PropertyError> for ErrorList {
    fn from(error: PropertyError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl IntoIterator for ErrorList {
    type Item = PropertyError;
    type IntoIter = std::vec::IntoIter<PropertyError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}
