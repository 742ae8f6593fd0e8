#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::core::storage::Constructor;

pub mod memory;
pub mod mock;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{MemoryConstructor, MemoryStorage};
pub use mock::{MockConstructor, MockStorage};
#[cfg(feature = "redis")]
pub use redis::{RedisConstructor, RedisStorage};

/// Drivers shipped with the crate, as `(name, constructor)` pairs
pub fn builtin() -> Vec<(String, Arc<dyn Constructor>)> {
    let mut drivers: Vec<(String, Arc<dyn Constructor>)> =
        vec![(memory::DRIVER_NAME.to_string(), Arc::new(MemoryConstructor))];

    #[cfg(feature = "redis")]
    drivers.push((redis::DRIVER_NAME.to_string(), Arc::new(RedisConstructor)));

    drivers
}
