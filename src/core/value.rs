//! Tagged configuration values.
//!
//! Configuration documents are loosely typed. Everything read from them is
//! held as a [`ConfigValue`] so callers have to match on the shape they
//! expect instead of assuming it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Mapping type used for configuration sections
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// A configuration value of any shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum ConfigValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Sequence(Vec<ConfigValue>),
    Map(ConfigMap),
}

impl ConfigValue {
    /// Empty mapping
    pub fn map() -> Self {
        Self::Map(ConfigMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_map(&self) -> Option<&ConfigMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Child of a mapping
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.as_map()?.get(key)
    }

    /// Walk a dot separated path, e.g. `kv.boltdb-south.config`
    ///
    /// The empty path resolves to `self`.
    pub fn get_path(&self, path: &str) -> Option<&ConfigValue> {
        if path.is_empty() {
            return Some(self);
        }

        let mut current = self;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Short name of the variant, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Sequence(_) => "sequence",
            Self::Map(_) => "map",
        }
    }

    /// Recursively merge `other` into `self`; `other` wins on conflicts
    pub fn merge(&mut self, other: &ConfigValue) {
        match (self, other) {
            (Self::Map(base), Self::Map(other)) => {
                for (key, value) in other {
                    if let Some(base_value) = base.get_mut(key) {
                        base_value.merge(value);
                    } else {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
            (base, other) => {
                *base = other.clone();
            }
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => write!(f, "{:?}", s),
            Self::Sequence(seq) => write!(f, "[{} items]", seq.len()),
            Self::Map(map) => write!(f, "{{{} keys}}", map.len()),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<ConfigMap> for ConfigValue {
    fn from(value: ConfigMap) -> Self {
        Self::Map(value)
    }
}
