//! JSON-RPC message types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::JSONRPC_VERSION;

/// JSON-RPC Request
///
/// The id is any JSON value the caller picked (number or string) and is
/// echoed back unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Value,
}

impl RpcRequest {
    /// Create a new RPC request
    pub fn new(method: impl Into<String>, params: Value, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: id.into(),
        }
    }
}

/// JSON-RPC Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// `null` only when the request id could not be read.
    #[serde(default)]
    pub id: Value,
}

impl RpcResponse {
    /// Create a success response
    pub fn success(result: Value, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id: id.into(),
        }
    }

    /// Create an error response
    pub fn error(error: RpcError, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id: id.into(),
        }
    }
}

/// JSON-RPC Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach a machine-readable error kind under `data.kind`
    pub fn with_kind(mut self, kind: &str) -> Self {
        self.data = Some(serde_json::json!({ "kind": kind }));
        self
    }

    /// The `data.kind` value, if any
    pub fn kind(&self) -> Option<&str> {
        self.data.as_ref()?.get("kind")?.as_str()
    }

    /// Standard error: Parse error
    pub fn parse_error() -> Self {
        Self::new(codes::PARSE_ERROR, "Parse error")
    }

    /// Standard error: Invalid request
    pub fn invalid_request() -> Self {
        Self::new(codes::INVALID_REQUEST, "Invalid Request")
    }

    /// Standard error: Method not found
    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    /// Standard error: Invalid params
    pub fn invalid_params(reason: impl std::fmt::Display) -> Self {
        Self::new(codes::INVALID_PARAMS, format!("Invalid params: {}", reason))
    }
}

/// Error codes
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    /// No storage name (or an empty key) in the request
    pub const KV_INVALID_REQUEST: i32 = -32001;
    /// The named storage is not configured
    pub const KV_UNKNOWN_STORAGE: i32 = -32002;
    /// The backing engine reported a failure
    pub const KV_STORAGE_FAILED: i32 = -32003;
}

/// RPC Method names (without the namespace prefix)
pub mod methods {
    pub const HAS: &str = "Has";
    pub const SET: &str = "Set";
    pub const MGET: &str = "MGet";
    pub const MEXPIRE: &str = "MExpire";
    pub const TTL: &str = "TTL";
    pub const DELETE: &str = "Delete";
    pub const CLEAR: &str = "Clear";

    /// Join a namespace and a method, e.g. `kv` + `Has` -> `kv.Has`
    pub fn qualified(namespace: &str, method: &str) -> String {
        format!("{}.{}", namespace, method)
    }
}
