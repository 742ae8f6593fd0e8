//! Driver registration and storage resolution.
//!
//! Construction is two-phase: drivers are registered on a
//! [`RegistryBuilder`], then [`RegistryBuilder::resolve`] walks the
//! namespace section of the configuration once and produces a read-only
//! [`Registry`] of named storage instances.
//!
//! ```toml
//! [kv.default]
//! driver = "memory"
//!
//! [kv.north]
//! driver = "redis"
//! config = { addrs = ["10.0.0.1:6379"] }   # local settings
//!
//! [kv.south]
//! driver = "redis"                         # settings from [south]
//!
//! [south]
//! addrs = ["10.0.0.2:6379"]
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::core::config::ConfigStore;
use crate::core::error::{KvError, Result};
use crate::core::storage::{ConfigSource, Constructor, Storage};
use crate::core::value::ConfigValue;

/// Namespace section holding the storage entries
pub const DEFAULT_NAMESPACE: &str = "kv";
/// Mandatory field of every storage entry
const DRIVER_FIELD: &str = "driver";
/// Optional per-instance settings block
const CONFIG_FIELD: &str = "config";

// ============================================================================
// Builder
// ============================================================================

/// Collects driver constructors before resolution
pub struct RegistryBuilder {
    namespace: String,
    constructors: HashMap<String, Arc<dyn Constructor>>,
    order: Vec<String>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            constructors: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Build from an ordered list of `(name, constructor)` pairs
    pub fn with_constructors<I>(constructors: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Arc<dyn Constructor>)>,
    {
        let mut builder = Self::new();
        for (name, constructor) in constructors {
            builder.register_arc(name, constructor)?;
        }
        Ok(builder)
    }

    /// Read storage entries from `[<namespace>]` instead of `[kv]`
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Register a constructor under its own name
    ///
    /// # Errors
    ///
    /// Returns [`KvError::DuplicateDriver`] if the name is already taken.
    pub fn register<C: Constructor>(&mut self, constructor: C) -> Result<&mut Self> {
        let name = constructor.name().to_string();
        self.register_arc(name, Arc::new(constructor))
    }

    /// Register a shared constructor under an explicit name
    pub fn register_arc(
        &mut self,
        name: impl Into<String>,
        constructor: Arc<dyn Constructor>,
    ) -> Result<&mut Self> {
        let name = name.into();

        if self.constructors.contains_key(&name) {
            return Err(KvError::DuplicateDriver(name));
        }

        info!("Registered storage driver: {}", name);
        self.order.push(name.clone());
        self.constructors.insert(name, constructor);
        Ok(self)
    }

    /// Registered driver names, in registration order
    pub fn drivers(&self) -> &[String] {
        &self.order
    }

    /// Turn the namespace section of `config` into live storages
    ///
    /// Null entries are skipped. Entries that are not maps, whose `driver`
    /// is not a string, or that name an unregistered driver are skipped
    /// with a warning. A map without `driver`, or a constructor failure,
    /// aborts resolution: every storage built so far is stopped and no
    /// registry is produced.
    pub fn resolve(&self, config: &ConfigStore) -> Result<Registry> {
        let namespace = self.namespace.as_str();

        let entries = match config.get_raw(namespace) {
            None | Some(ConfigValue::Null) => {
                info!("No [{}] section configured, no storages to resolve", namespace);
                return Ok(Registry::empty(namespace));
            }
            Some(ConfigValue::Map(entries)) => entries,
            Some(other) => {
                return Err(KvError::malformed(
                    namespace,
                    format!("expected a map of storages, found {}", other.type_name()),
                ));
            }
        };

        let mut resolved = Resolution::new(namespace);

        for (name, entry) in entries {
            let fields = match entry {
                ConfigValue::Null => {
                    debug!("Storage '{}' has an empty entry, skipping", name);
                    continue;
                }
                ConfigValue::Map(fields) => fields,
                other => {
                    warn!(
                        "Storage '{}' is a {}, not a map; check the indentation of [{}]",
                        name,
                        other.type_name(),
                        namespace
                    );
                    resolved.skip(KvError::malformed(
                        format!("{}.{}", namespace, name),
                        format!("expected a map, found {}", other.type_name()),
                    ));
                    continue;
                }
            };

            let Some(driver) = fields.get(DRIVER_FIELD) else {
                return Err(resolved.abort(KvError::malformed(
                    format!("{}.{}", namespace, name),
                    "missing mandatory `driver` field",
                )));
            };

            let Some(driver) = driver.as_str() else {
                debug!(
                    "Storage '{}' has a non-string driver ({}), skipping",
                    name,
                    driver.type_name()
                );
                continue;
            };

            if name.contains('.') {
                warn!("Storage name '{}' must not contain '.', skipping", name);
                resolved.skip(KvError::malformed(
                    format!("{}.{}", namespace, name),
                    "storage names must not contain '.'",
                ));
                continue;
            }

            let Some(constructor) = self.constructors.get(driver) else {
                warn!(
                    "Storage '{}' requests unregistered driver '{}' (registered: {:?}), skipping",
                    name, driver, self.order
                );
                resolved.skip(KvError::UnregisteredDriver {
                    instance: name.clone(),
                    driver: driver.to_string(),
                });
                continue;
            };

            let source = self.config_source(config, name, fields.get(CONFIG_FIELD));
            if source == ConfigSource::None {
                warn!(
                    "No local ({}.{}.{}) or global ({}) configuration for storage '{}', \
                     building it with driver defaults",
                    namespace, name, CONFIG_FIELD, name, name
                );
            }

            match constructor.build(&source, config) {
                Ok(storage) => {
                    info!(
                        "Storage '{}' ready (driver: {}, config: {:?})",
                        name, driver, source
                    );
                    resolved.insert(name.clone(), storage);
                }
                Err(err) => {
                    return Err(resolved.abort(KvError::ConstructorFailed {
                        instance: name.clone(),
                        driver: driver.to_string(),
                        source: err,
                    }));
                }
            }
        }

        Ok(resolved.finish())
    }

    /// Local `config` block wins over a same-named top-level section
    fn config_source(
        &self,
        config: &ConfigStore,
        name: &str,
        local: Option<&ConfigValue>,
    ) -> ConfigSource {
        if local.is_some_and(|value| !value.is_null()) {
            return ConfigSource::Local(format!("{}.{}.{}", self.namespace, name, CONFIG_FIELD));
        }

        let global = config.root().get(name);
        if global.is_some_and(|value| !value.is_null()) {
            return ConfigSource::Global(name.to_string());
        }

        ConfigSource::None
    }
}

/// Storages built so far during one resolution pass
struct Resolution {
    namespace: String,
    storages: HashMap<String, Arc<dyn Storage>>,
    skipped: Vec<KvError>,
}

impl Resolution {
    fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            storages: HashMap::new(),
            skipped: Vec::new(),
        }
    }

    fn insert(&mut self, name: String, storage: Arc<dyn Storage>) {
        self.storages.insert(name, storage);
    }

    fn skip(&mut self, reason: KvError) {
        self.skipped.push(reason);
    }

    /// Stop everything built so far and hand back the fatal error
    fn abort(self, error: KvError) -> KvError {
        warn!(
            "Storage resolution aborted, stopping {} already built storages",
            self.storages.len()
        );
        for storage in self.storages.values() {
            storage.stop();
        }
        error
    }

    fn finish(self) -> Registry {
        info!(
            "Resolved {} storages ({} skipped)",
            self.storages.len(),
            self.skipped.len()
        );
        Registry {
            namespace: self.namespace,
            storages: self.storages,
            skipped: self.skipped,
            stopped: AtomicBool::new(false),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Named storage instances, read-only once resolved
pub struct Registry {
    namespace: String,
    storages: HashMap<String, Arc<dyn Storage>>,
    skipped: Vec<KvError>,
    stopped: AtomicBool,
}

impl Registry {
    /// A registry with no storages
    pub fn empty(namespace: &str) -> Self {
        Resolution::new(namespace).finish()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Look up a storage by instance name; nothing resolves after teardown
    pub fn get(&self, name: &str) -> Option<Arc<dyn Storage>> {
        if self.is_stopped() {
            return None;
        }
        self.storages.get(name).cloned()
    }

    /// Instance names, sorted
    pub fn names(&self) -> Vec<&str> {
        if self.is_stopped() {
            return Vec::new();
        }
        let mut names: Vec<&str> = self.storages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-fatal problems met during resolution
    pub fn skipped(&self) -> &[KvError] {
        &self.skipped
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop every storage once, waiting at most `deadline`
    ///
    /// Each `stop` runs on the blocking pool. When the deadline elapses the
    /// pending stops are not interrupted; they keep running in the
    /// background and only the waiting ends.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!("Registry already stopped");
            return Ok(());
        }

        info!("Stopping {} storages", self.storages.len());

        let tasks: Vec<_> = self
            .storages
            .iter()
            .map(|(name, storage)| {
                let name = name.clone();
                let storage = storage.clone();
                tokio::task::spawn_blocking(move || {
                    debug!("Stopping storage: {}", name);
                    storage.stop();
                    name
                })
            })
            .collect();

        match tokio::time::timeout(deadline, join_all(tasks)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!("Storage stop task failed: {}", e);
                    }
                }
                info!("All storages stopped");
                Ok(())
            }
            Err(_) => {
                warn!(
                    "Storages did not stop within {:?}, leaving them to finish in the background",
                    deadline
                );
                Err(KvError::DeadlineExceeded(deadline))
            }
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            for storage in self.storages.values() {
                storage.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::observability::LogCapture;
    use crate::driver::mock::{MockConstructor, MockStorage};

    fn builder(drivers: &[&MockConstructor]) -> RegistryBuilder {
        let mut builder = RegistryBuilder::new();
        for driver in drivers {
            builder.register((*driver).clone()).unwrap();
        }
        builder
    }

    #[test]
    fn one_storage_per_entry() {
        let memory = MockConstructor::new("memory");
        let boltdb = MockConstructor::new("boltdb");
        let config = ConfigStore::parse(
            r#"
            [kv.default]
            driver = "memory"

            [kv.boltdb-north]
            driver = "boltdb"
            config = { file = "north.db" }

            [kv.boltdb-south]
            driver = "boltdb"
            config = { file = "south.db" }
        "#,
        )
        .unwrap();

        let registry = builder(&[&memory, &boltdb]).resolve(&config).unwrap();

        assert_eq!(registry.names(), ["boltdb-north", "boltdb-south", "default"]);
        assert!(registry.skipped().is_empty());
        assert_eq!(memory.built().len(), 1);
        assert_eq!(
            boltdb.built(),
            vec![
                ConfigSource::Local("kv.boltdb-north.config".into()),
                ConfigSource::Local("kv.boltdb-south.config".into()),
            ]
        );
    }

    #[test]
    fn local_config_overrides_global() {
        let boltdb = MockConstructor::new("boltdb");
        let config = ConfigStore::parse(
            r#"
            [kv.foo]
            driver = "boltdb"
            config = { path = "A" }

            [foo]
            path = "B"
        "#,
        )
        .unwrap();

        let registry = builder(&[&boltdb]).resolve(&config).unwrap();
        assert!(registry.get("foo").is_some());

        let source = boltdb.built().remove(0);
        assert_eq!(source, ConfigSource::Local("kv.foo.config".into()));

        #[derive(serde::Deserialize, Default)]
        struct Bolt {
            path: String,
        }
        assert_eq!(source.load::<Bolt>(&config).unwrap().path, "A");
    }

    #[test]
    fn global_section_is_the_fallback() {
        let boltdb = MockConstructor::new("boltdb");
        let config = ConfigStore::parse(
            r#"
            [kv.foo]
            driver = "boltdb"

            [foo]
            path = "B"
        "#,
        )
        .unwrap();

        builder(&[&boltdb]).resolve(&config).unwrap();
        assert_eq!(boltdb.built(), vec![ConfigSource::Global("foo".into())]);
    }

    #[test]
    fn no_settings_builds_with_defaults() {
        let memory = MockConstructor::new("memory");
        let config = ConfigStore::parse(
            r#"
            [kv.cache]
            driver = "memory"
        "#,
        )
        .unwrap();

        let registry = builder(&[&memory]).resolve(&config).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(memory.built(), vec![ConfigSource::None]);
    }

    #[test]
    fn missing_driver_field_is_fatal_and_stops_built_storages() {
        let memory = MockConstructor::new("memory");
        let config = ConfigStore::parse_json(
            r#"{"kv": {
                "a-first": {"driver": "memory"},
                "b-broken": {"config": {"path": "x"}},
                "c-never": {"driver": "memory"}
            }}"#,
        )
        .unwrap();

        let err = builder(&[&memory]).resolve(&config).err().unwrap();
        assert!(matches!(err, KvError::ConfigurationMalformed { .. }));
        assert_eq!(memory.built().len(), 1);
        assert_eq!(memory.storages()[0].stop_count(), 1);
    }

    #[test]
    fn constructor_failure_is_fatal() {
        let good = MockConstructor::new("memory");
        let bad = MockConstructor::failing("redis");
        let config = ConfigStore::parse_json(
            r#"{"kv": {"a": {"driver": "memory"}, "b": {"driver": "redis"}}}"#,
        )
        .unwrap();

        let err = builder(&[&good, &bad]).resolve(&config).err().unwrap();
        match err {
            KvError::ConstructorFailed {
                instance, driver, ..
            } => {
                assert_eq!(instance, "b");
                assert_eq!(driver, "redis");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(good.storages()[0].stop_count(), 1);
    }

    #[test]
    fn soft_problems_are_skipped() {
        let memory = MockConstructor::new("memory");
        let config = ConfigStore::parse_json(
            r#"{"kv": {
                "empty": null,
                "scalar": "memory",
                "numeric-driver": {"driver": 42},
                "unknown": {"driver": "memcached"},
                "dotted.name": {"driver": "memory"},
                "ok": {"driver": "memory"}
            }}"#,
        )
        .unwrap();

        let registry = builder(&[&memory]).resolve(&config).unwrap();

        assert_eq!(registry.names(), ["ok"]);
        let kinds: Vec<_> = registry.skipped().iter().map(KvError::kind).collect();
        assert_eq!(
            kinds,
            ["configuration_malformed", "configuration_malformed", "unregistered_driver"]
        );
    }

    #[test]
    fn unregistered_driver_is_skipped_without_a_defaults_warning() {
        let (logs, _guard) = LogCapture::install();
        let memory = MockConstructor::new("memory");
        let config = ConfigStore::parse_json(r#"{"kv": {"cache": {"driver": "memcached"}}}"#).unwrap();

        let registry = builder(&[&memory]).resolve(&config).unwrap();
        assert!(registry.is_empty());
        assert!(memory.built().is_empty());

        let lines = logs.lines();
        assert!(lines.iter().any(|line| line.contains("unregistered driver 'memcached'")));
        assert!(!lines.iter().any(|line| line.contains("driver defaults")), "{lines:?}");
    }

    #[test]
    fn missing_namespace_gives_empty_registry() {
        let registry = RegistryBuilder::new()
            .resolve(&ConfigStore::parse("[rpc]\nlisten = \"127.0.0.1:6001\"").unwrap())
            .unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn namespace_must_be_a_map() {
        let err = RegistryBuilder::new()
            .resolve(&ConfigStore::parse_json(r#"{"kv": [1, 2]}"#).unwrap())
            .err()
            .unwrap();
        assert!(matches!(err, KvError::ConfigurationMalformed { .. }));
    }

    #[test]
    fn custom_namespace() {
        let memory = MockConstructor::new("memory");
        let config = ConfigStore::parse(
            r#"
            [cache.hot]
            driver = "memory"
            config = { size = 1 }
        "#,
        )
        .unwrap();

        let registry = builder(&[&memory])
            .namespace("cache")
            .resolve(&config)
            .unwrap();
        assert_eq!(registry.namespace(), "cache");
        assert_eq!(memory.built(), vec![ConfigSource::Local("cache.hot.config".into())]);
    }

    #[test]
    fn duplicate_driver_is_rejected() {
        let mut builder = RegistryBuilder::new();
        builder.register(MockConstructor::new("memory")).unwrap();
        let err = builder.register(MockConstructor::new("memory")).err().unwrap();
        assert!(matches!(err, KvError::DuplicateDriver(name) if name == "memory"));

        let pairs: Vec<(String, Arc<dyn Constructor>)> = vec![
            ("memory".into(), Arc::new(MockConstructor::new("memory"))),
            ("memory".into(), Arc::new(MockConstructor::new("memory"))),
        ];
        assert!(RegistryBuilder::with_constructors(pairs).is_err());
    }

    #[test]
    fn same_constructor_under_two_names() {
        let shared: Arc<dyn Constructor> = Arc::new(MockConstructor::new("memory"));
        let builder = RegistryBuilder::with_constructors(vec![
            ("memory".to_string(), shared.clone()),
            ("in-process".to_string(), shared),
        ])
        .unwrap();
        assert_eq!(builder.drivers(), ["memory", "in-process"]);
    }

    #[tokio::test]
    async fn shutdown_stops_each_storage_once() {
        let memory = MockConstructor::new("memory");
        let config =
            ConfigStore::parse_json(r#"{"kv": {"a": {"driver": "memory"}, "b": {"driver": "memory"}}}"#)
                .unwrap();
        let registry = builder(&[&memory]).resolve(&config).unwrap();

        registry.shutdown(Duration::from_secs(1)).await.unwrap();
        registry.shutdown(Duration::from_secs(1)).await.unwrap();
        drop(registry);

        for storage in memory.storages() {
            assert_eq!(storage.stop_count(), 1);
        }
    }

    #[tokio::test]
    async fn shutdown_hides_storages() {
        let memory = MockConstructor::new("memory");
        let config = ConfigStore::parse_json(r#"{"kv": {"a": {"driver": "memory"}}}"#).unwrap();
        let registry = builder(&[&memory]).resolve(&config).unwrap();
        assert!(registry.get("a").is_some());

        registry.shutdown(Duration::from_secs(1)).await.unwrap();

        assert!(registry.get("a").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn shutdown_reports_deadline_and_leaves_stop_running() {
        let slow = MockConstructor::new("slow").stop_delay(Duration::from_millis(300));
        let config = ConfigStore::parse_json(r#"{"kv": {"a": {"driver": "slow"}}}"#).unwrap();
        let registry = builder(&[&slow]).resolve(&config).unwrap();

        let err = registry
            .shutdown(Duration::from_millis(20))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, KvError::DeadlineExceeded(_)));

        let storage: Arc<MockStorage> = slow.storages().remove(0);
        assert_eq!(storage.stop_count(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(storage.stop_count(), 1);
    }
}
