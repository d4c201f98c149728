//! Configuration records consumed by [`Dialer::bootstrap`][crate::Dialer::bootstrap].
//!
//! An [`Options`] value is a string-keyed JSON object. Each dialer picks out the
//! keys it recognizes and ignores the rest, so a single record can carry both
//! the keys for a dialer (`id`, `matcher`) and the keys its owner reads back via
//! [`Dialer::options`][crate::Dialer::options] (`fail_remove`).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// A generic, string-keyed configuration record.
#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options {
    inner: Map<String, Value>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.iter()).finish()
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.inner.clone()))
    }
}

impl Options {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a record from JSON text. The text must hold a JSON object.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(text)?;
        Self::try_from(value)
    }

    /// Set `key` to `value`, returning the updated record.
    pub fn with<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.inner.insert(key.to_owned(), value.into());
        self
    }

    /// Set `key` to `value`.
    pub fn insert<V: Into<Value>>(&mut self, key: &str, value: V) -> Option<Value> {
        self.inner.insert(key.to_owned(), value.into())
    }

    /// Raw access to a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    /// Whether the record contains no keys.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// String value for `key`, or `""` when it is missing or not a string.
    pub fn str_val(&self, key: &str) -> &str {
        self.inner.get(key).and_then(Value::as_str).unwrap_or("")
    }

    /// Integer value for `key`, or `default` when it is missing.
    ///
    /// Integers written as strings (`"500"`) are accepted.
    pub fn int_val_or(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.inner.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => as_int(value).ok_or_else(|| ConfigError::InvalidOption {
                key: key.to_owned(),
                reason: format!("expected integer, found {value}"),
            }),
        }
    }

    /// List of integers for `key`. A missing key yields an empty list.
    pub fn int_list(&self, key: &str) -> Result<Vec<i64>, ConfigError> {
        match self.inner.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    as_int(item).ok_or_else(|| ConfigError::InvalidOption {
                        key: key.to_owned(),
                        reason: format!("expected integer, found {item}"),
                    })
                })
                .collect(),
            Some(other) => Err(ConfigError::InvalidOption {
                key: key.to_owned(),
                reason: format!("expected list, found {other}"),
            }),
        }
    }

    /// List of nested records for `key`. A missing key yields an empty list.
    pub fn map_list(&self, key: &str) -> Result<Vec<Options>, ConfigError> {
        match self.inner.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(Options { inner: map.clone() }),
                    other => Err(ConfigError::InvalidOption {
                        key: key.to_owned(),
                        reason: format!("expected object, found {other}"),
                    }),
                })
                .collect(),
            Some(other) => Err(ConfigError::InvalidOption {
                key: key.to_owned(),
                reason: format!("expected list, found {other}"),
            }),
        }
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl TryFrom<Value> for Options {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(inner) => Ok(Options { inner }),
            other => Err(ConfigError::InvalidOption {
                key: String::new(),
                reason: format!("expected object, found {other}"),
            }),
        }
    }
}

impl From<Map<String, Value>> for Options {
    fn from(inner: Map<String, Value>) -> Self {
        Options { inner }
    }
}

impl From<Options> for Value {
    fn from(options: Options) -> Self {
        Value::Object(options.inner)
    }
}
