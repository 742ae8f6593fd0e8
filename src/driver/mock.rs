use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::config::ConfigStore;
use crate::core::item::Item;
use crate::core::storage::{ConfigSource, Constructor, Storage};

/// Constructor for tests.
///
/// Remembers every config source it was asked to build from and every
/// storage it handed out. Clones share that state.
#[derive(Clone)]
pub struct MockConstructor {
    inner: Arc<MockConstructorInner>,
}

struct MockConstructorInner {
    name: String,
    fail_build: bool,
    stop_delay: Duration,
    built: Mutex<Vec<ConfigSource>>,
    storages: Mutex<Vec<Arc<MockStorage>>>,
}

impl MockConstructor {
    pub fn new(name: &str) -> Self {
        Self::with(name, false, Duration::ZERO)
    }

    /// A constructor whose `build` always fails
    pub fn failing(name: &str) -> Self {
        Self::with(name, true, Duration::ZERO)
    }

    /// Storages built from now on block this long in `stop`
    pub fn stop_delay(self, delay: Duration) -> Self {
        Self::with(&self.inner.name, self.inner.fail_build, delay)
    }

    fn with(name: &str, fail_build: bool, stop_delay: Duration) -> Self {
        Self {
            inner: Arc::new(MockConstructorInner {
                name: name.to_string(),
                fail_build,
                stop_delay,
                built: Mutex::new(Vec::new()),
                storages: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Config sources seen by `build`, in call order
    pub fn built(&self) -> Vec<ConfigSource> {
        self.inner.built.lock().clone()
    }

    /// Storages handed out, in build order
    pub fn storages(&self) -> Vec<Arc<MockStorage>> {
        self.inner.storages.lock().clone()
    }
}

impl Constructor for MockConstructor {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn build(&self, source: &ConfigSource, _config: &ConfigStore) -> Result<Arc<dyn Storage>> {
        self.inner.built.lock().push(source.clone());

        if self.inner.fail_build {
            bail!("mock driver '{}' refuses to build", self.inner.name);
        }

        let storage = Arc::new(MockStorage::new(self.inner.stop_delay));
        self.inner.storages.lock().push(storage.clone());
        Ok(storage)
    }
}

/// Storage for tests.
///
/// Keeps values and raw timeout strings in a map, counts calls and stops,
/// and can be switched into a failing mode.
#[derive(Default)]
pub struct MockStorage {
    data: Mutex<HashMap<String, (Vec<u8>, Option<String>)>>,
    calls: AtomicUsize,
    stops: AtomicUsize,
    failing: AtomicBool,
    stop_delay: Duration,
    last_span: Mutex<Option<&'static str>>,
}

impl MockStorage {
    pub fn new(stop_delay: Duration) -> Self {
        Self {
            stop_delay,
            ..Default::default()
        }
    }

    /// Make every following operation fail
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Operations received, including failed ones
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Name of the `tracing` span current during the latest operation
    pub fn last_span(&self) -> Option<&'static str> {
        *self.last_span.lock()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_span.lock() = tracing::Span::current().metadata().map(|m| m.name());
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("mock storage failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn has(&self, keys: &[String]) -> Result<HashSet<String>> {
        self.enter()?;
        let data = self.data.lock();
        Ok(keys.iter().filter(|k| data.contains_key(*k)).cloned().collect())
    }

    async fn set(&self, items: Vec<Item>) -> Result<()> {
        self.enter()?;
        let mut data = self.data.lock();
        for item in items {
            let (key, value, timeout) = item.into_parts();
            data.insert(key, (value, timeout));
        }
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        self.enter()?;
        let data = self.data.lock();
        Ok(keys
            .iter()
            .filter_map(|k| data.get(k).map(|(value, _)| (k.clone(), value.clone())))
            .collect())
    }

    async fn mexpire(&self, items: Vec<Item>) -> Result<()> {
        self.enter()?;
        let mut data = self.data.lock();
        for item in items {
            if let Some(entry) = data.get_mut(item.key()) {
                entry.1 = item.timeout().map(str::to_string);
            }
        }
        Ok(())
    }

    async fn ttl(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        self.enter()?;
        let data = self.data.lock();
        Ok(keys
            .iter()
            .filter_map(|k| {
                let (_, timeout) = data.get(k)?;
                Some((k.clone(), timeout.clone()?))
            })
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        self.enter()?;
        let mut data = self.data.lock();
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.enter()?;
        self.data.lock().clear();
        Ok(())
    }

    fn stop(&self) {
        if !self.stop_delay.is_zero() {
            std::thread::sleep(self.stop_delay);
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
