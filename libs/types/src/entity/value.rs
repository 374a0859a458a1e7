//! Tagged property values and type coercions

use chrono::{DateTime, SecondsFormat, Utc};

use super::data_set::DataSet;
use super::Entity;
use crate::error::PropertyError;

/// A tagged property value.
///
/// `Empty` is the absent-but-present marker (a property that exists with no
/// content, e.g. an unparsed placeholder); `Null` is an explicit null.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Empty,
    Entity(Box<Entity>),
    EntityList(Vec<Entity>),
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    Vector(Vec<f64>),
    DataSet(DataSet),
    Timestamp(DateTime<Utc>),
    Null,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "EMPTY",
            Value::Entity(_) => "ENTITY",
            Value::EntityList(_) => "ENTITY_LIST",
            Value::String(_) => "STRING",
            Value::Int(_) => "INTEGER",
            Value::Double(_) => "DOUBLE",
            Value::Bool(_) => "BOOL",
            Value::Vector(_) => "VECTOR",
            Value::DataSet(_) => "DATA_SET",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Null => "NULL",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Render the value the way it appears on the wire.
    ///
    /// Doubles drop trailing zeros so `304.800` formats as `304.8` and
    /// `1.0` as `1`.
    pub fn to_text(&self) -> String {
        match self {
            Value::Empty | Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => format_double(*d),
            Value::Bool(b) => b.to_string(),
            Value::Vector(v) => v
                .iter()
                .map(|d| format_double(*d))
                .collect::<Vec<_>>()
                .join(" "),
            Value::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Value::DataSet(ds) => ds.to_text(),
            Value::Entity(e) => e.name().to_string(),
            Value::EntityList(l) => format!("[{} entities]", l.len()),
        }
    }

    /// Coerce to a double, parsing strings and widening integers.
    pub fn to_double(&self, property: &str) -> Result<f64, PropertyError> {
        match self {
            Value::Double(d) => Ok(*d),
            Value::Int(i) => Ok(*i as f64),
            Value::String(s) => s.trim().parse::<f64>().map_err(|_| PropertyError::Conversion {
                property: property.to_string(),
                value: s.clone(),
                expected: "DOUBLE",
            }),
            other => Err(PropertyError::Conversion {
                property: property.to_string(),
                value: other.to_text(),
                expected: "DOUBLE",
            }),
        }
    }

    /// Coerce to an integer. Doubles must be whole numbers.
    pub fn to_int(&self, property: &str) -> Result<i64, PropertyError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Double(d) if d.fract() == 0.0 => Ok(*d as i64),
            Value::String(s) => s.trim().parse::<i64>().map_err(|_| PropertyError::Conversion {
                property: property.to_string(),
                value: s.clone(),
                expected: "INTEGER",
            }),
            other => Err(PropertyError::Conversion {
                property: property.to_string(),
                value: other.to_text(),
                expected: "INTEGER",
            }),
        }
    }

    pub fn to_bool(&self, property: &str) -> Result<bool, PropertyError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(PropertyError::Conversion {
                    property: property.to_string(),
                    value: s.clone(),
                    expected: "BOOL",
                }),
            },
            other => Err(PropertyError::Conversion {
                property: property.to_string(),
                value: other.to_text(),
                expected: "BOOL",
            }),
        }
    }

    /// Coerce to a vector of doubles, splitting strings on whitespace.
    pub fn to_vector(&self, property: &str) -> Result<Vec<f64>, PropertyError> {
        match self {
            Value::Vector(v) => Ok(v.clone()),
            Value::Double(d) => Ok(vec![*d]),
            Value::Int(i) => Ok(vec![*i as f64]),
            Value::String(s) => {
                let mut out = Vec::new();
                for part in s.split_whitespace() {
                    out.push(part.parse::<f64>().map_err(|_| PropertyError::Conversion {
                        property: property.to_string(),
                        value: s.clone(),
                        expected: "VECTOR",
                    })?);
                }
                Ok(out)
            }
            other => Err(PropertyError::Conversion {
                property: property.to_string(),
                value: other.to_text(),
                expected: "VECTOR",
            }),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Format a double without trailing zeros.
pub fn format_double(d: f64) -> String {
    if d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{}", d as i64)
    } else {
        let mut s = format!("{}", d);
        if s.contains('.') {
            while s.ends_with('0') {
                s.pop();
            }
            if s.ends_with('.') {
                s.pop();
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_format_without_trailing_zeros() {
        assert_eq!(format_double(304.8), "304.8");
        assert_eq!(format_double(1.0), "1");
        assert_eq!(format_double(-2.5), "-2.5");
        assert_eq!(format_double(0.0), "0");
    }

    #[test]
    fn string_coercions() {
        assert_eq!(Value::String("1.5".into()).to_double("x").unwrap(), 1.5);
        assert_eq!(Value::String(" 42 ".into()).to_int("x").unwrap(), 42);
        assert!(Value::String("yes".into()).to_bool("x").unwrap());
        assert_eq!(
            Value::String("1 2.5 3".into()).to_vector("x").unwrap(),
            vec![1.0, 2.5, 3.0]
        );
    }

    #[test]
    fn bad_coercion_reports_property() {
        let err = Value::String("abc".into()).to_double("rate").unwrap_err();
        match err {
            PropertyError::Conversion { property, .. } => assert_eq!(property, "rate"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
