pub mod config;
pub mod dispatcher;
pub mod error;
pub mod item;
pub mod observability;
pub mod registry;
pub mod storage;
pub mod value;

pub use config::{ConfigStore, Configurable};
pub use dispatcher::Dispatcher;
pub use error::{KvError, Result};
pub use item::Item;
pub use observability::{InMemoryTracer, LogTracer, NoopTracer, TraceSpan, Tracer};
pub use registry::{DEFAULT_NAMESPACE, Registry, RegistryBuilder};
pub use storage::{ConfigSource, Constructor, Operation, Storage};
pub use value::ConfigValue;
