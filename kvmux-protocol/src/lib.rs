//! kvmux Wire Protocol
//!
//! This crate defines the JSON-RPC protocol spoken between kvmux and its
//! clients. It carries no behaviour, only the shapes that go over the wire.
//!
//! # Protocol Overview
//!
//! Communication occurs over TCP using JSON-RPC 2.0, one message per line.
//!
//! ## Methods
//!
//! - `kv.Has` - Keys that exist in a storage
//! - `kv.Set` - Upsert items
//! - `kv.MGet` - Values of existing keys
//! - `kv.MExpire` - Refresh item timeouts
//! - `kv.TTL` - Expiry instants of keys that have one
//! - `kv.Delete` - Remove keys
//! - `kv.Clear` - Remove every key of one storage

mod rpc;
mod types;

pub use rpc::*;
pub use types::*;

/// JSON-RPC version
pub const JSONRPC_VERSION: &str = "2.0";
