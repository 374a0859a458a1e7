//! Typed query parameter coercion
//!
//! Coercion failures accumulate so a response can report every bad
//! parameter at once.

use std::collections::HashMap;

use crate::error::RestError;

/// Accumulating view over a request's query parameters.
pub struct QueryParams {
    map: HashMap<String, String>,
    errors: Vec<String>,
}

impl QueryParams {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self {
            map,
            errors: Vec::new(),
        }
    }

    pub fn string(&mut self, name: &str) -> Option<String> {
        self.map.get(name).cloned()
    }

    pub fn unsigned(&mut self, name: &str) -> Option<u64> {
        let raw = self.map.get(name)?;
        match raw.parse::<u64>() {
            Ok(v) => Some(v),
            Err(_) => {
                self.errors
                    .push(format!("'{}' must be an unsigned integer, got '{}'", name, raw));
                None
            }
        }
    }

    pub fn integer(&mut self, name: &str) -> Option<i64> {
        let raw = self.map.get(name)?;
        match raw.parse::<i64>() {
            Ok(v) => Some(v),
            Err(_) => {
                self.errors
                    .push(format!("'{}' must be an integer, got '{}'", name, raw));
                None
            }
        }
    }

    pub fn integer_or(&mut self, name: &str, default: i64) -> i64 {
        self.integer(name).unwrap_or(default)
    }

    pub fn boolean_or(&mut self, name: &str, default: bool) -> bool {
        match self.map.get(name) {
            None => default,
            Some(raw) => match raw.as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                other => {
                    self.errors
                        .push(format!("'{}' must be a boolean, got '{}'", name, other));
                    default
                }
            },
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Fail the request when any coercion failed.
    pub fn finish(self) -> Result<(), RestError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(RestError::InvalidParameterValue {
                errors: self.errors,
            })
        }
    }
}
