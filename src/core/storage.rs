//! Storage capability contract.
//!
//! Every backing engine implements [`Storage`]; every engine kind is
//! produced by a [`Constructor`] registered under a driver name.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use kvmux_protocol::methods;

use crate::core::config::ConfigStore;
use crate::core::item::Item;

// ============================================================================
// Operations
// ============================================================================

/// Operations reachable through the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Has,
    Set,
    MGet,
    MExpire,
    Ttl,
    Delete,
    Clear,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Has,
        Operation::Set,
        Operation::MGet,
        Operation::MExpire,
        Operation::Ttl,
        Operation::Delete,
        Operation::Clear,
    ];

    /// Lowercase name, used in span names (`kv:mget`)
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Has => "has",
            Self::Set => "set",
            Self::MGet => "mget",
            Self::MExpire => "mexpire",
            Self::Ttl => "ttl",
            Self::Delete => "delete",
            Self::Clear => "clear",
        }
    }

    /// RPC method name without namespace (`MGet`)
    pub fn method(self) -> &'static str {
        match self {
            Self::Has => methods::HAS,
            Self::Set => methods::SET,
            Self::MGet => methods::MGET,
            Self::MExpire => methods::MEXPIRE,
            Self::Ttl => methods::TTL,
            Self::Delete => methods::DELETE,
            Self::Clear => methods::CLEAR,
        }
    }

    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.method() == method)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Storage
// ============================================================================

/// A live storage instance
///
/// Missing keys are never an error: `has`, `mget` and `ttl` return only
/// the keys they found, `delete` ignores unknown keys.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Subset of `keys` that currently exist
    async fn has(&self, keys: &[String]) -> Result<HashSet<String>>;

    /// Upsert; overwrites both value and timeout
    async fn set(&self, items: Vec<Item>) -> Result<()>;

    /// Values of existing, non-expired keys
    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>>;

    /// Set or refresh the timeout of existing keys; values are ignored
    async fn mexpire(&self, items: Vec<Item>) -> Result<()>;

    /// RFC3339 expiry of each key that has one
    async fn ttl(&self, keys: &[String]) -> Result<HashMap<String, String>>;

    async fn delete(&self, keys: &[String]) -> Result<()>;

    /// Remove every key of this instance only
    async fn clear(&self) -> Result<()>;

    /// Release underlying resources. Idempotent; failures are logged by
    /// the implementation.
    fn stop(&self);
}

// ============================================================================
// Constructor
// ============================================================================

/// Where a storage instance takes its settings from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// `<namespace>.<instance>.config`
    Local(String),
    /// Top-level section named after the instance
    Global(String),
    /// Neither exists; the driver runs on its defaults
    None,
}

impl ConfigSource {
    /// Config key handed to the driver; empty for [`ConfigSource::None`]
    pub fn key(&self) -> &str {
        match self {
            Self::Local(key) | Self::Global(key) => key,
            Self::None => "",
        }
    }

    /// Deserialize the driver settings, falling back to `T::default()`
    pub fn load<T>(&self, config: &ConfigStore) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match self {
            Self::None => Ok(T::default()),
            source => config.unmarshal(source.key()),
        }
    }
}

/// Factory for one driver kind (e.g. `memory`, `redis`)
pub trait Constructor: Send + Sync + 'static {
    /// Driver name referenced by the `driver` field of a storage entry
    fn name(&self) -> &str;

    /// Build a storage instance from the section at `source`
    fn build(&self, source: &ConfigSource, config: &ConfigStore) -> Result<Arc<dyn Storage>>;
}
