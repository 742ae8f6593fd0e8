//! Line-delimited JSON-RPC server in front of a [`Dispatcher`].

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Result;
use kvmux_protocol::{JSONRPC_VERSION, Request, RpcError, RpcRequest, RpcResponse, codes};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::core::dispatcher::Dispatcher;
use crate::core::error::KvError;
use crate::core::observability::error_chain;
use crate::core::storage::Operation;

pub struct RpcServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
}

impl RpcServer {
    pub async fn bind(addr: impl ToSocketAddrs, dispatcher: Dispatcher) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process ends
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves
    ///
    /// Every connection runs on its own task and is aborted once the
    /// server stops accepting.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(
            "RPC listening on {} (namespace '{}')",
            addr,
            self.dispatcher.registry().namespace()
        );

        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {}", peer);
                        let dispatcher = self.dispatcher.clone();
                        connections.spawn(async move {
                            if let Err(err) = serve_connection(stream, dispatcher).await {
                                debug!("Connection {} closed: {}", peer, err);
                            }
                        });
                    }
                    Err(err) => warn!("Failed to accept connection: {}", err),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!("RPC server stopping, dropping {} connections", connections.len());
        connections.shutdown().await;
        Ok(())
    }
}

async fn serve_connection(stream: TcpStream, dispatcher: Dispatcher) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&dispatcher, &line).await;
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Answer one JSON-RPC message
pub async fn handle_line(dispatcher: &Dispatcher, line: &str) -> RpcResponse {
    let raw: Value = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(_) => return RpcResponse::error(RpcError::parse_error(), Value::Null),
    };
    let id = raw.get("id").cloned().unwrap_or(Value::Null);

    let request: RpcRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(_) => return RpcResponse::error(RpcError::invalid_request(), id),
    };
    if request.jsonrpc != JSONRPC_VERSION {
        return RpcResponse::error(RpcError::invalid_request(), request.id);
    }

    match handle(dispatcher, request.method, request.params).await {
        Ok(result) => RpcResponse::success(result, request.id),
        Err(err) => RpcResponse::error(err, request.id),
    }
}

async fn handle(dispatcher: &Dispatcher, method: String, params: Value) -> Result<Value, RpcError> {
    let op = resolve_method(dispatcher.registry().namespace(), &method)
        .ok_or_else(|| RpcError::method_not_found(&method))?;

    let request: Request = match params {
        Value::Null => Request::default(),
        params => serde_json::from_value(params).map_err(RpcError::invalid_params)?,
    };

    let response = dispatcher.dispatch(op, request).await.map_err(into_rpc_error)?;
    serde_json::to_value(response)
        .map_err(|err| RpcError::new(codes::INTERNAL_ERROR, err.to_string()))
}

/// `<namespace>.<Method>` to an operation
fn resolve_method(namespace: &str, method: &str) -> Option<Operation> {
    let name = method.strip_prefix(namespace)?.strip_prefix('.')?;
    Operation::from_method(name)
}

fn into_rpc_error(err: KvError) -> RpcError {
    let code = match &err {
        KvError::InvalidRequest(_) => codes::KV_INVALID_REQUEST,
        KvError::UnknownStorage(_) => codes::KV_UNKNOWN_STORAGE,
        KvError::StorageOperationFailed { .. } => codes::KV_STORAGE_FAILED,
        _ => codes::INTERNAL_ERROR,
    };
    RpcError::new(code, error_chain(&err)).with_kind(err.kind())
}
