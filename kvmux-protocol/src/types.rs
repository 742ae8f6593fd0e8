//! Request and response payloads carried in `params` / `result`

use serde::{Deserialize, Serialize};

// ============================================================================
// Item
// ============================================================================

/// Unit of transfer on the wire
///
/// Empty `value` and `timeout` are omitted when serialized and default to
/// empty when missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    /// Opaque bytes, base64 encoded on the wire
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_bytes")]
    pub value: Vec<u8>,
    /// RFC3339 instant or relative duration (`30s`, `5m`, ...)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timeout: String,
}

impl Item {
    /// Item carrying only a key
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timeout: String::new(),
        }
    }

    pub fn timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = timeout.into();
        self
    }
}

// ============================================================================
// Envelopes
// ============================================================================

/// Parameters of every method
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Name of the configured storage instance
    #[serde(default)]
    pub storage: String,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl Request {
    pub fn new(storage: impl Into<String>) -> Self {
        Self {
            storage: storage.into(),
            items: Vec::new(),
        }
    }

    pub fn item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    /// Add key-only items
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items.extend(keys.into_iter().map(Item::key));
        self
    }
}

/// Result of every method
///
/// Items come back in no particular order; match them by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub items: Vec<Item>,
}

impl Response {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a returned item by key
    pub fn get(&self, key: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.key == key)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.key.as_str()).collect()
    }
}

// ============================================================================
// Helpers
// ============================================================================

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
