//! Client for the line-delimited JSON-RPC surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kvmux_protocol::{Request, Response, RpcError, RpcRequest, RpcResponse, methods};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use crate::core::registry::DEFAULT_NAMESPACE;

/// Default per-call timeout
pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("call '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("server closed the connection")]
    Closed,

    #[error("response id {got} does not match request id {expected}")]
    IdMismatch { expected: u64, got: Value },

    #[error("rpc error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),
}

impl ClientError {
    /// The server-side error, if the call reached the server and failed there
    pub fn rpc(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(err) => Some(err),
            _ => None,
        }
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Bytes of a reply line whose read was cut short by a timeout
    pending: String,
}

impl Connection {
    /// Read replies until the one for `id`
    ///
    /// Replies to earlier calls that timed out or were dropped are
    /// discarded. Safe to cancel: a partially read line stays in
    /// `pending` and is completed by the next read.
    async fn read_reply(&mut self, id: u64) -> Result<RpcResponse, ClientError> {
        loop {
            if self.reader.read_line(&mut self.pending).await? == 0 {
                return Err(ClientError::Closed);
            }
            let line = std::mem::take(&mut self.pending);
            debug!("Received RPC: {}", line.trim());

            let response: RpcResponse = serde_json::from_str(&line)?;
            match response.id.as_u64() {
                Some(got) if got == id => return Ok(response),
                Some(got) if got < id => debug!("Discarding late reply to call {}", got),
                _ => {
                    return Err(ClientError::IdMismatch {
                        expected: id,
                        got: response.id,
                    });
                }
            }
        }
    }
}

/// One connection to a server; calls are serialized over it
pub struct RpcClient {
    conn: Mutex<Connection>,
    namespace: String,
    next_id: AtomicU64,
    timeout: Duration,
}

impl RpcClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            conn: Mutex::new(Connection {
                reader: BufReader::new(reader),
                writer,
                pending: String::new(),
            }),
            namespace: DEFAULT_NAMESPACE.to_string(),
            next_id: AtomicU64::new(1),
            timeout: RPC_TIMEOUT,
        })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn has(&self, request: Request) -> Result<Response, ClientError> {
        self.invoke(methods::HAS, request).await
    }

    pub async fn set(&self, request: Request) -> Result<Response, ClientError> {
        self.invoke(methods::SET, request).await
    }

    pub async fn mget(&self, request: Request) -> Result<Response, ClientError> {
        self.invoke(methods::MGET, request).await
    }

    pub async fn mexpire(&self, request: Request) -> Result<Response, ClientError> {
        self.invoke(methods::MEXPIRE, request).await
    }

    pub async fn ttl(&self, request: Request) -> Result<Response, ClientError> {
        self.invoke(methods::TTL, request).await
    }

    pub async fn delete(&self, request: Request) -> Result<Response, ClientError> {
        self.invoke(methods::DELETE, request).await
    }

    pub async fn clear(&self, request: Request) -> Result<Response, ClientError> {
        self.invoke(methods::CLEAR, request).await
    }

    async fn invoke(&self, method: &str, request: Request) -> Result<Response, ClientError> {
        let method = methods::qualified(&self.namespace, method);
        let result = self.call(&method, serde_json::to_value(request)?).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send one request and wait for its response
    ///
    /// Calls are serialized over the connection; ids are handed out under
    /// the lock so they reach the server in increasing order.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let mut conn = self.conn.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, params, id);

        let mut line = serde_json::to_string(&request)?;
        debug!("Sending RPC: {}", line);
        line.push('\n');

        conn.writer.write_all(line.as_bytes()).await?;
        conn.writer.flush().await?;

        let response = timeout(self.timeout, conn.read_reply(id))
            .await
            .map_err(|_| ClientError::Timeout {
                method: method.to_string(),
                timeout: self.timeout,
            })??;
        drop(conn);

        if let Some(error) = response.error {
            return Err(ClientError::Rpc(error));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    /// A server that answers every call with its method name, holding
    /// back the reply to call 1 for `delay`
    async fn slow_first_reply(delay: Duration) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, writer) = stream.into_split();
            let writer = Arc::new(Mutex::new(writer));
            let mut lines = BufReader::new(reader).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                let request: RpcRequest = serde_json::from_str(&line).unwrap();
                let writer = writer.clone();
                tokio::spawn(async move {
                    if request.id == 1 {
                        tokio::time::sleep(delay).await;
                    }
                    let reply = RpcResponse::success(json!({ "method": request.method }), request.id);
                    let mut out = serde_json::to_vec(&reply).unwrap();
                    out.push(b'\n');
                    let _ = writer.lock().await.write_all(&out).await;
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn late_replies_do_not_desync_the_connection() {
        let addr = slow_first_reply(Duration::from_millis(200)).await;
        let client = RpcClient::connect(addr)
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(50));

        let err = client.call("kv.Has", Value::Null).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }), "{err}");

        let second = client.call("kv.Set", Value::Null).await.unwrap();
        assert_eq!(second["method"], "kv.Set");

        // the reply to call 1 is now queued ahead of call 3's
        tokio::time::sleep(Duration::from_millis(250)).await;
        let third = client.call("kv.MGet", Value::Null).await.unwrap();
        assert_eq!(third["method"], "kv.MGet");
    }

    #[tokio::test]
    async fn reply_for_an_unknown_call_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let reply = RpcResponse::success(Value::Null, "someone-else");
            let mut out = serde_json::to_vec(&reply).unwrap();
            out.push(b'\n');
            stream.write_all(&out).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let client = RpcClient::connect(addr).await.unwrap();
        let err = client.call("kv.Has", Value::Null).await.unwrap_err();
        match err {
            ClientError::IdMismatch { expected, got } => {
                assert_eq!(expected, 1);
                assert_eq!(got, "someone-else");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
