//! kvmux
//!
//! Routes key-value operations to named storage instances. Drivers are
//! registered once, the `[kv]` section of the configuration is resolved
//! into live storages, and a JSON-RPC server forwards each call to the
//! storage named in the request.
//!
//! ```ignore
//! use kvmux::prelude::*;
//!
//! let config = ConfigStore::from_file("kvmux.toml")?;
//! let registry = RegistryBuilder::with_constructors(driver::builtin())?.resolve(&config)?;
//! let dispatcher = Dispatcher::new(Arc::new(registry));
//! RpcServer::bind("127.0.0.1:6001", dispatcher).await?.serve().await?;
//! ```

#![forbid(unsafe_code)]

pub mod core;
pub mod driver;
pub mod prelude;
pub mod rpc;

pub use kvmux_protocol as protocol;
