//! kvmux runner
//!
//! Loads the configuration, resolves every storage under the configured
//! namespace, serves JSON-RPC until Ctrl+C and then stops the storages.
//!
//! The configuration path is the first argument, else `$KVMUX_CONFIG`,
//! else `kvmux.toml` in the working directory.

mod logging;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use kvmux::core::{ConfigStore, Dispatcher, LogTracer, RegistryBuilder};
use kvmux::driver;
use kvmux::rpc::RpcServer;
use tracing::{error, info, warn};

use crate::settings::{LogConfig, RpcConfig};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const DEFAULT_CONFIG: &str = "kvmux.toml";

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("KVMUX_CONFIG"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = if path.exists() {
        ConfigStore::from_file(&path)?
    } else {
        ConfigStore::empty()
    };

    let _guard = logging::init(&config.get::<LogConfig>()?)?;
    info!("Starting kvmux v{}", env!("CARGO_PKG_VERSION"));
    if config.path().is_none() {
        warn!("{} not found, running without storages", path.display());
    }

    let rpc: RpcConfig = config.get()?;

    let builder = RegistryBuilder::with_constructors(driver::builtin())?.namespace(&rpc.namespace);
    info!("Drivers: {}", builder.drivers().join(", "));

    let registry = Arc::new(builder.resolve(&config)?);
    info!(
        "{} storages ready, {} skipped: [{}]",
        registry.len(),
        registry.skipped().len(),
        registry.names().join(", ")
    );

    let dispatcher = Dispatcher::new(registry.clone()).with_tracer(Arc::new(LogTracer));
    let server = RpcServer::bind(rpc.listen.as_str(), dispatcher).await?;
    server.serve_with_shutdown(shutdown_signal()).await?;

    if let Err(err) = registry.shutdown(rpc.shutdown_timeout()).await {
        warn!("{}", err);
    }

    Ok(())
}
