//! JSON-RPC transport: one JSON object per line over TCP.

pub mod client;
pub mod server;

pub use client::{ClientError, RpcClient};
pub use server::RpcServer;
