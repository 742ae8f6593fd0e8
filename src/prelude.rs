// Convenience re-exports: use kvmux::prelude::*;
pub use std::sync::Arc;

pub use crate::core::{
    ConfigSource, ConfigStore, Configurable, Constructor, Dispatcher, Item, KvError, Operation,
    Registry, RegistryBuilder, Storage, Tracer,
};
pub use crate::driver;
pub use crate::rpc::{RpcClient, RpcServer};
pub use kvmux_protocol::{Request, Response};

// Re-export async_trait for Storage impls
pub use async_trait::async_trait;
