//! Configuration store.
//!
//! Loads TOML or JSON documents into a tagged [`ConfigValue`] tree and
//! exposes the two primitives the resolver relies on: [`ConfigStore::has`]
//! and [`ConfigStore::unmarshal`].

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::core::value::ConfigValue;

// ============================================================================
// Configurable Trait
// ============================================================================

/// Trait for types that can be loaded from configuration
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use kvmux::core::config::Configurable;
///
/// #[derive(Debug, Deserialize, Default)]
/// pub struct RpcConfig {
///     pub listen: String,
/// }
///
/// impl Configurable for RpcConfig {
///     const PREFIX: &'static str = "rpc";
/// }
/// ```
pub trait Configurable: DeserializeOwned + Default {
    /// Configuration section prefix (corresponds to the top-level key)
    const PREFIX: &'static str;
}

// ============================================================================
// Configuration Store
// ============================================================================

/// Document format, picked from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }

    fn parse(self, content: &str) -> Result<ConfigValue> {
        let data = match self {
            Self::Toml => {
                toml::from_str(content).map_err(|e| anyhow!("Failed to parse TOML: {}", e))?
            }
            Self::Json => serde_json::from_str(content)
                .map_err(|e| anyhow!("Failed to parse JSON: {}", e))?,
        };
        Ok(data)
    }
}

/// Configuration storage
///
/// # Example
///
/// ```ignore
/// use kvmux::core::config::ConfigStore;
///
/// let config = ConfigStore::from_file("kvmux.toml")?;
/// assert!(config.has("kv.default.driver"));
/// ```
#[derive(Debug, Clone)]
pub struct ConfigStore {
    data: ConfigValue,
    path: Option<PathBuf>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl ConfigStore {
    /// Create an empty configuration store
    pub fn empty() -> Self {
        Self {
            data: ConfigValue::map(),
            path: None,
        }
    }

    /// Create a configuration store from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        Ok(Self {
            data: ConfigFormat::Toml.parse(content)?,
            path: None,
        })
    }

    /// Create a configuration store from a JSON string
    pub fn parse_json(content: &str) -> Result<Self> {
        Ok(Self {
            data: ConfigFormat::Json.parse(content)?,
            path: None,
        })
    }

    /// Wrap an already built value
    pub fn from_value(data: ConfigValue) -> Self {
        Self { data, path: None }
    }

    /// Create a configuration store from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let data = Self::read(path)?;

        Ok(Self {
            data,
            path: Some(path.to_path_buf()),
        })
    }

    fn read(path: &Path) -> Result<ConfigValue> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

        ConfigFormat::from_path(path)
            .parse(&content)
            .map_err(|e| anyhow!("{} in '{}'", e, path.display()))
    }

    /// Get a typed configuration section
    ///
    /// If the section doesn't exist, returns the default value.
    pub fn get<C: Configurable>(&self) -> Result<C> {
        debug!("Loading config section: {}", C::PREFIX);

        if !self.has(C::PREFIX) {
            return Ok(C::default());
        }

        self.unmarshal(C::PREFIX)
    }

    /// Deserialize the value found at a dotted key path
    pub fn unmarshal<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .get_raw(key)
            .ok_or_else(|| anyhow!("Config section '{}' not found", key))?;

        let json = serde_json::to_value(value)
            .map_err(|e| anyhow!("Failed to read config section '{}': {}", key, e))?;

        serde_json::from_value(json)
            .map_err(|e| anyhow!("Failed to deserialize config section '{}': {}", key, e))
    }

    /// Get a raw value by key path
    ///
    /// Key path uses dot notation, e.g., "kv.default.driver"
    pub fn get_raw(&self, key: &str) -> Option<&ConfigValue> {
        self.data.get_path(key)
    }

    /// Check if a key path exists and holds a non-null value
    pub fn has(&self, key: &str) -> bool {
        !key.is_empty() && self.get_raw(key).is_some_and(|value| !value.is_null())
    }

    /// The whole document
    pub fn root(&self) -> &ConfigValue {
        &self.data
    }

    /// Reload configuration from file
    ///
    /// Only works if the configuration was loaded from a file.
    pub fn reload(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Err(anyhow!(
                "Cannot reload: configuration was not loaded from a file"
            ));
        };

        info!("Reloading configuration from: {}", path.display());
        self.data = Self::read(&path)?;
        Ok(())
    }

    /// Get the configuration file path (if loaded from file)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Merge another configuration into this one
    ///
    /// Values from `other` will override values in `self`.
    pub fn merge(&mut self, other: &ConfigStore) {
        self.data.merge(&other.data);
    }
}
