//! Typed sections read by the runner

use std::path::PathBuf;
use std::time::Duration;

use kvmux::core::config::Configurable;
use kvmux::core::registry::DEFAULT_NAMESPACE;
use serde::Deserialize;

/// `[rpc]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub listen: String,
    /// Seconds granted to storages to stop
    pub shutdown_timeout: u64,
    /// Config section holding the storages, also the RPC method prefix
    pub namespace: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:6001".to_string(),
            shutdown_timeout: 30,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl Configurable for RpcConfig {
    const PREFIX: &'static str = "rpc";
}

impl RpcConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// `[logs]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive; `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
    /// Write daily rolling files here instead of stderr
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
            directory: None,
            file_prefix: "kvmux.log".to_string(),
        }
    }
}

impl Configurable for LogConfig {
    const PREFIX: &'static str = "logs";
}

#[cfg(test)]
mod tests {
    use kvmux::core::config::ConfigStore;

    use super::*;

    #[test]
    fn test_defaults_without_sections() {
        let config = ConfigStore::empty();
        let rpc: RpcConfig = config.get().unwrap();
        let logs: LogConfig = config.get().unwrap();

        assert_eq!(rpc.listen, "127.0.0.1:6001");
        assert_eq!(rpc.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(rpc.namespace, "kv");
        assert_eq!(logs.format, LogFormat::Plain);
        assert!(logs.directory.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config = ConfigStore::parse(
            r#"
            [rpc]
            listen = "0.0.0.0:7000"

            [logs]
            format = "json"
            directory = "/var/log/kvmux"
        "#,
        )
        .unwrap();

        let rpc: RpcConfig = config.get().unwrap();
        let logs: LogConfig = config.get().unwrap();

        assert_eq!(rpc.listen, "0.0.0.0:7000");
        assert_eq!(rpc.shutdown_timeout, 30);
        assert_eq!(logs.format, LogFormat::Json);
        assert_eq!(logs.level, "info");
        assert_eq!(logs.directory, Some(PathBuf::from("/var/log/kvmux")));
    }
}
