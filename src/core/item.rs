//! Items handed to storage engines, and timeout encoding.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use anyhow::{Result, anyhow, bail};

/// Unit of transfer between the dispatcher and a storage engine
///
/// Immutable once built. `MExpire` uses only `key` and `timeout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    key: String,
    value: Vec<u8>,
    timeout: Option<String>,
}

impl Item {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timeout: None,
        }
    }

    /// Attach an expiry; an empty string means no expiry
    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        let timeout = timeout.into();
        self.timeout = (!timeout.is_empty()).then_some(timeout);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn timeout(&self) -> Option<&str> {
        self.timeout.as_deref()
    }

    /// Absolute expiry instant, `None` when the item never expires
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        match self.timeout() {
            Some(timeout) => parse_timeout(timeout, now).map(Some),
            None => Ok(None),
        }
    }

    pub fn into_parts(self) -> (String, Vec<u8>, Option<String>) {
        (self.key, self.value, self.timeout)
    }
}

impl From<kvmux_protocol::Item> for Item {
    fn from(item: kvmux_protocol::Item) -> Self {
        Item::new(item.key, item.value).with_timeout(item.timeout)
    }
}

/// Parse an RFC3339 instant or a relative duration (`250ms`, `30s`, `5m`, `2h`)
pub fn parse_timeout(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("empty timeout");
    }

    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }

    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("timeout '{}' has no unit", raw))?;
    let (amount, unit) = raw.split_at(split);
    let amount: i64 = amount
        .parse()
        .map_err(|_| anyhow!("timeout '{}' is neither RFC3339 nor a duration", raw))?;

    let delta = match unit {
        "ms" => Duration::try_milliseconds(amount),
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        _ => bail!("timeout '{}' has unknown unit '{}'", raw, unit),
    };

    delta
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| anyhow!("timeout '{}' is out of range", raw))
}

/// Encode an expiry instant the way `TTL` reports it
pub fn format_expiry(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}
