//! Request routing over a resolved [`Registry`].

use std::future::Future;
use std::sync::Arc;

use kvmux_protocol::{Item as WireItem, Request, Response};
use tracing::{Instrument, debug};

use crate::core::error::{KvError, Result};
use crate::core::item::Item;
use crate::core::observability::{NoopTracer, Tracer};
use crate::core::registry::Registry;
use crate::core::storage::{Operation, Storage};

/// Stateless router from wire requests to storage calls
///
/// Every call runs inside a `<namespace>:<operation>` span; errors are
/// recorded on the span before they are returned. Calls are single
/// attempt, there is no retry at this layer.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    tracer: Arc<dyn Tracer>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            tracer: Arc::new(NoopTracer),
        }
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn has(&self, request: Request) -> Result<Response> {
        self.dispatch(Operation::Has, request).await
    }

    pub async fn set(&self, request: Request) -> Result<Response> {
        self.dispatch(Operation::Set, request).await
    }

    pub async fn mget(&self, request: Request) -> Result<Response> {
        self.dispatch(Operation::MGet, request).await
    }

    pub async fn mexpire(&self, request: Request) -> Result<Response> {
        self.dispatch(Operation::MExpire, request).await
    }

    pub async fn ttl(&self, request: Request) -> Result<Response> {
        self.dispatch(Operation::Ttl, request).await
    }

    pub async fn delete(&self, request: Request) -> Result<Response> {
        self.dispatch(Operation::Delete, request).await
    }

    pub async fn clear(&self, request: Request) -> Result<Response> {
        self.dispatch(Operation::Clear, request).await
    }

    /// Validate, route and run one operation
    pub async fn dispatch(&self, op: Operation, request: Request) -> Result<Response> {
        self.traced(op, || self.route(op, request)).await
    }

    async fn traced<F, Fut, T>(&self, op: Operation, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let name = format!("{}:{}", self.registry.namespace(), op);
        let mut span = self.tracer.start_span(&name);

        let result = call().instrument(span.span()).await;

        if let Err(err) = &result {
            debug!("{} failed: {}", name, err);
            span.record_error(err);
        }
        result
    }

    async fn route(&self, op: Operation, request: Request) -> Result<Response> {
        let Request {
            storage: name,
            items,
        } = request;

        let storage = self.lookup(&name)?;
        debug!("{} on storage '{}' with {} items", op, name, items.len());

        let failed = |source: anyhow::Error| KvError::StorageOperationFailed {
            op,
            storage: name.clone(),
            source,
        };

        match op {
            Operation::Has => {
                let found = storage.has(&keys(&items)?).await.map_err(failed)?;
                Ok(Response {
                    items: found.into_iter().map(WireItem::key).collect(),
                })
            }
            Operation::Set => {
                storage.set(contract_items(items)?).await.map_err(failed)?;
                Ok(Response::empty())
            }
            Operation::MGet => {
                let values = storage.mget(&keys(&items)?).await.map_err(failed)?;
                Ok(Response {
                    items: values
                        .into_iter()
                        .map(|(key, value)| WireItem::new(key, value))
                        .collect(),
                })
            }
            Operation::MExpire => {
                storage
                    .mexpire(contract_items(items)?)
                    .await
                    .map_err(failed)?;
                Ok(Response::empty())
            }
            Operation::Ttl => {
                let timeouts = storage.ttl(&keys(&items)?).await.map_err(failed)?;
                Ok(Response {
                    items: timeouts
                        .into_iter()
                        .map(|(key, timeout)| WireItem::key(key).timeout(timeout))
                        .collect(),
                })
            }
            Operation::Delete => {
                storage.delete(&keys(&items)?).await.map_err(failed)?;
                Ok(Response::empty())
            }
            Operation::Clear => {
                storage.clear().await.map_err(failed)?;
                Ok(Response::empty())
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Storage>> {
        if name.is_empty() {
            return Err(KvError::InvalidRequest("no storage provided".to_string()));
        }

        self.registry
            .get(name)
            .ok_or_else(|| KvError::UnknownStorage(name.to_string()))
    }
}

fn check_key(position: usize, key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(KvError::InvalidRequest(format!(
            "item {} has an empty key",
            position
        )));
    }
    Ok(())
}

fn keys(items: &[WireItem]) -> Result<Vec<String>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| check_key(i, &item.key).map(|_| item.key.clone()))
        .collect()
}

fn contract_items(items: Vec<WireItem>) -> Result<Vec<Item>> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| check_key(i, &item.key).map(|_| Item::from(item)))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::config::ConfigStore;
    use crate::core::observability::{InMemoryTracer, LogCapture, LogTracer};
    use crate::core::registry::RegistryBuilder;
    use crate::driver::mock::{MockConstructor, MockStorage};

    struct Fixture {
        dispatcher: Dispatcher,
        tracer: InMemoryTracer,
        storages: Vec<Arc<MockStorage>>,
    }

    /// Two storages, `a` and `b`, both backed by the mock driver
    fn fixture() -> Fixture {
        let mock = MockConstructor::new("mock");
        let mut builder = RegistryBuilder::new();
        builder.register(mock.clone()).unwrap();

        let config = ConfigStore::parse(
            r#"
            [kv.a]
            driver = "mock"

            [kv.b]
            driver = "mock"
        "#,
        )
        .unwrap();

        let registry = Arc::new(builder.resolve(&config).unwrap());
        let tracer = InMemoryTracer::new();
        let dispatcher = Dispatcher::new(registry).with_tracer(Arc::new(tracer.clone()));

        Fixture {
            dispatcher,
            tracer,
            storages: mock.storages(),
        }
    }

    fn set_request(storage: &str, pairs: &[(&str, &str)]) -> Request {
        pairs.iter().fold(Request::new(storage), |req, (k, v)| {
            req.item(WireItem::new(*k, v.as_bytes().to_vec()))
        })
    }

    fn sorted_keys(resp: &Response) -> Vec<&str> {
        let mut keys = resp.keys();
        keys.sort_unstable();
        keys
    }

    #[tokio::test]
    async fn set_then_has() {
        let f = fixture();
        f.dispatcher
            .set(set_request("a", &[("key", "val")]))
            .await
            .unwrap();

        let resp = f
            .dispatcher
            .has(Request::new("a").keys(["key", "never-written"]))
            .await
            .unwrap();

        assert_eq!(resp.keys(), ["key"]);
        assert!(resp.items[0].value.is_empty());
    }

    #[tokio::test]
    async fn deleted_keys_disappear() {
        let f = fixture();
        f.dispatcher
            .set(set_request("a", &[("x", "1"), ("y", "2")]))
            .await
            .unwrap();
        f.dispatcher
            .delete(Request::new("a").keys(["x", "ghost"]))
            .await
            .unwrap();

        let resp = f
            .dispatcher
            .has(Request::new("a").keys(["x", "y"]))
            .await
            .unwrap();
        assert_eq!(resp.keys(), ["y"]);
    }

    #[tokio::test]
    async fn mget_returns_only_present_keys() {
        let f = fixture();
        f.dispatcher
            .set(set_request("a", &[("one", "1"), ("two", "2")]))
            .await
            .unwrap();

        let resp = f
            .dispatcher
            .mget(Request::new("a").keys(["one", "missing", "two"]))
            .await
            .unwrap();

        assert_eq!(sorted_keys(&resp), ["one", "two"]);
        assert_eq!(resp.get("two").unwrap().value, b"2");
        assert!(resp.get("missing").is_none());
    }

    #[tokio::test]
    async fn ttl_omits_keys_without_expiry() {
        let f = fixture();
        f.dispatcher
            .set(
                Request::new("a")
                    .item(WireItem::new("plain", b"v".to_vec()))
                    .item(WireItem::new("timed", b"v".to_vec()).timeout("2030-01-01T00:00:00Z")),
            )
            .await
            .unwrap();

        let resp = f
            .dispatcher
            .ttl(Request::new("a").keys(["plain", "timed", "missing"]))
            .await
            .unwrap();

        assert_eq!(resp.keys(), ["timed"]);
        assert_eq!(resp.items[0].timeout, "2030-01-01T00:00:00Z");
        assert!(resp.items[0].value.is_empty());
    }

    #[tokio::test]
    async fn mexpire_passes_timeouts_through() {
        let f = fixture();
        f.dispatcher
            .set(set_request("a", &[("k", "v")]))
            .await
            .unwrap();
        f.dispatcher
            .mexpire(Request::new("a").item(WireItem::key("k").timeout("10s")))
            .await
            .unwrap();

        let resp = f.dispatcher.ttl(Request::new("a").keys(["k"])).await.unwrap();
        assert_eq!(resp.get("k").unwrap().timeout, "10s");
    }

    #[tokio::test]
    async fn empty_storage_name_is_invalid() {
        let f = fixture();
        let err = f
            .dispatcher
            .set(set_request("", &[("k", "v")]))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, KvError::InvalidRequest(_)));
        assert!(f.storages.iter().all(|s| s.call_count() == 0));
    }

    #[tokio::test]
    async fn unknown_storage_is_named() {
        let f = fixture();
        let err = f
            .dispatcher
            .has(Request::new("ghost").keys(["k"]))
            .await
            .err()
            .unwrap();

        assert!(matches!(&err, KvError::UnknownStorage(name) if name == "ghost"));
        assert_eq!(err.to_string(), "no such storage: ghost");
        assert!(f.storages.iter().all(|s| s.call_count() == 0));
    }

    #[tokio::test]
    async fn empty_key_is_invalid() {
        let f = fixture();
        let err = f
            .dispatcher
            .mget(Request::new("a").keys(["ok", ""]))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, KvError::InvalidRequest(_)));
        assert!(f.storages.iter().all(|s| s.call_count() == 0));
    }

    #[tokio::test]
    async fn clear_is_scoped_to_one_storage() {
        let f = fixture();
        f.dispatcher
            .set(set_request("a", &[("shared", "a")]))
            .await
            .unwrap();
        f.dispatcher
            .set(set_request("b", &[("shared", "b")]))
            .await
            .unwrap();

        f.dispatcher.clear(Request::new("a")).await.unwrap();

        let in_a = f.dispatcher.has(Request::new("a").keys(["shared"])).await.unwrap();
        let in_b = f.dispatcher.mget(Request::new("b").keys(["shared"])).await.unwrap();
        assert!(in_a.items.is_empty());
        assert_eq!(in_b.get("shared").unwrap().value, b"b");
    }

    #[tokio::test]
    async fn storage_failure_is_wrapped_and_traced() {
        let f = fixture();
        for storage in &f.storages {
            storage.fail(true);
        }

        let err = f
            .dispatcher
            .mget(Request::new("a").keys(["k"]))
            .await
            .err()
            .unwrap();

        match &err {
            KvError::StorageOperationFailed { op, storage, .. } => {
                assert_eq!(*op, Operation::MGet);
                assert_eq!(storage, "a");
            }
            other => panic!("unexpected error: {other}"),
        }

        let spans = f.tracer.snapshot();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "kv:mget");
        assert_eq!(
            spans[0].errors,
            ["mget failed on storage 'a': mock storage failure"]
        );
    }

    #[tokio::test]
    async fn every_operation_gets_a_span() {
        let f = fixture();
        let d = &f.dispatcher;

        d.has(Request::new("a")).await.unwrap();
        d.set(Request::new("a")).await.unwrap();
        d.mget(Request::new("a")).await.unwrap();
        d.mexpire(Request::new("a")).await.unwrap();
        d.ttl(Request::new("a")).await.unwrap();
        d.delete(Request::new("a")).await.unwrap();
        d.clear(Request::new("a")).await.unwrap();
        let _ = d.has(Request::new("")).await;

        let names: Vec<_> = f.tracer.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            ["kv:has", "kv:set", "kv:mget", "kv:mexpire", "kv:ttl", "kv:delete", "kv:clear", "kv:has"]
        );
        assert_eq!(f.tracer.snapshot()[7].errors, ["invalid request: no storage provided"]);
    }

    #[tokio::test]
    async fn storage_calls_run_inside_the_call_span() {
        let (logs, _guard) = LogCapture::install();
        let f = fixture();
        let d = f.dispatcher.clone().with_tracer(Arc::new(LogTracer));

        d.has(Request::new("a").keys(["k"])).await.unwrap();
        assert_eq!(f.storages[0].last_span(), Some("kv_call"));

        f.dispatcher.has(Request::new("a").keys(["k"])).await.unwrap();
        assert_eq!(f.storages[0].last_span(), None);

        let lines = logs.lines();
        let routed = lines
            .iter()
            .find(|line| line.contains("has on storage 'a'"))
            .unwrap();
        assert!(routed.contains("kv_call{span_name=kv:has}"), "{routed}");
    }

    #[tokio::test]
    async fn failures_are_logged_once_at_error() {
        let (logs, _guard) = LogCapture::install();
        let f = fixture();
        let d = f.dispatcher.clone().with_tracer(Arc::new(LogTracer));

        let _ = d.has(Request::new("ghost").keys(["k"])).await;

        let errors: Vec<_> = logs
            .lines()
            .into_iter()
            .filter(|line| line.contains(" ERROR "))
            .collect();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("no such storage: ghost"));
    }

    #[tokio::test]
    async fn nothing_routes_after_shutdown() {
        let f = fixture();
        f.dispatcher
            .registry()
            .shutdown(Duration::from_secs(1))
            .await
            .unwrap();

        let err = f
            .dispatcher
            .has(Request::new("a").keys(["k"]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, KvError::UnknownStorage(_)));
    }
}
