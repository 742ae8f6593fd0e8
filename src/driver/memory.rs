//! In-process storage driver.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::config::ConfigStore;
use crate::core::item::{Item, format_expiry};
use crate::core::storage::{ConfigSource, Constructor, Storage};

pub const DRIVER_NAME: &str = "memory";

/// Settings of a `memory` storage
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Seconds between sweeps of expired entries; 0 disables the sweeper
    pub interval: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { interval: 60 }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryConstructor;

impl Constructor for MemoryConstructor {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn build(&self, source: &ConfigSource, config: &ConfigStore) -> Result<Arc<dyn Storage>> {
        let settings: MemoryConfig = source.load(config)?;
        Ok(Arc::new(MemoryStorage::new(settings)))
    }
}

// ============================================================================
// Storage
// ============================================================================

struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Map of key to value with optional expiry
///
/// Expired entries are never returned; they are physically removed by the
/// sweeper or when overwritten.
pub struct MemoryStorage {
    data: Arc<DashMap<String, Entry>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStorage {
    pub fn new(config: MemoryConfig) -> Self {
        let data = Arc::new(DashMap::new());
        let sweeper = spawn_sweeper(data.clone(), config.interval);

        Self {
            data,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub fn sweep(&self) -> usize {
        sweep(&self.data, Utc::now())
    }

    /// Entries held, expired ones included until swept
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn live<T>(&self, key: &str, now: DateTime<Utc>, f: impl FnOnce(&Entry) -> T) -> Option<T> {
        self.data
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| f(&entry))
    }
}

fn sweep(data: &DashMap<String, Entry>, now: DateTime<Utc>) -> usize {
    let mut removed = 0;
    data.retain(|_, entry| {
        let keep = entry.is_live(now);
        if !keep {
            removed += 1;
        }
        keep
    });
    removed
}

fn spawn_sweeper(data: Arc<DashMap<String, Entry>>, interval: u64) -> Option<JoinHandle<()>> {
    if interval == 0 {
        return None;
    }
    let runtime = tokio::runtime::Handle::try_current().ok()?;

    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval));
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = sweep(&data, Utc::now());
            if removed > 0 {
                debug!("Swept {} expired entries", removed);
            }
        }
    }))
}

/// Resolve every timeout up front so a bad one fails the call before any write
fn with_expiry(items: Vec<Item>, now: DateTime<Utc>) -> Result<Vec<(Item, Option<DateTime<Utc>>)>> {
    items
        .into_iter()
        .map(|item| {
            let expires_at = item.expires_at(now)?;
            Ok((item, expires_at))
        })
        .collect()
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn has(&self, keys: &[String]) -> Result<HashSet<String>> {
        let now = Utc::now();
        Ok(keys
            .iter()
            .filter(|key| self.live(key, now, |_| ()).is_some())
            .cloned()
            .collect())
    }

    async fn set(&self, items: Vec<Item>) -> Result<()> {
        for (item, expires_at) in with_expiry(items, Utc::now())? {
            let (key, value, _) = item.into_parts();
            self.data.insert(key, Entry { value, expires_at });
        }
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let now = Utc::now();
        Ok(keys
            .iter()
            .filter_map(|key| {
                let value = self.live(key, now, |entry| entry.value.clone())?;
                Some((key.clone(), value))
            })
            .collect())
    }

    async fn mexpire(&self, items: Vec<Item>) -> Result<()> {
        let now = Utc::now();
        for (item, expires_at) in with_expiry(items, now)? {
            if let Some(mut entry) = self.data.get_mut(item.key()) {
                if entry.is_live(now) {
                    entry.expires_at = expires_at;
                }
            }
        }
        Ok(())
    }

    async fn ttl(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        let now = Utc::now();
        Ok(keys
            .iter()
            .filter_map(|key| {
                let at = self.live(key, now, |entry| entry.expires_at)??;
                Some((key.clone(), format_expiry(at)))
            })
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.data.remove(key);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.data.clear();
        Ok(())
    }

    fn stop(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        self.stop();
    }
}
