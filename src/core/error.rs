use std::time::Duration;

use thiserror::Error;

use crate::core::storage::Operation;

/// Errors surfaced by registration, resolution, dispatch and teardown
#[derive(Error, Debug)]
pub enum KvError {
    /// A storage entry (or the namespace section itself) has the wrong shape
    #[error("malformed configuration for '{section}': {reason}")]
    ConfigurationMalformed { section: String, reason: String },

    /// The entry names a driver nobody registered; the entry is skipped
    #[error("storage '{instance}' requests unregistered driver '{driver}'")]
    UnregisteredDriver { instance: String, driver: String },

    #[error("driver '{driver}' failed to build storage '{instance}'")]
    ConstructorFailed {
        instance: String,
        driver: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("driver '{0}' is already registered")]
    DuplicateDriver(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no such storage: {0}")]
    UnknownStorage(String),

    #[error("{op} failed on storage '{storage}'")]
    StorageOperationFailed {
        op: Operation,
        storage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("teardown did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("configuration error")]
    Config(#[from] anyhow::Error),
}

impl KvError {
    /// Stable identifier of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigurationMalformed { .. } => "configuration_malformed",
            Self::UnregisteredDriver { .. } => "unregistered_driver",
            Self::ConstructorFailed { .. } => "constructor_failed",
            Self::DuplicateDriver(_) => "duplicate_driver",
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnknownStorage(_) => "unknown_storage",
            Self::StorageOperationFailed { .. } => "storage_operation_failed",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::Config(_) => "config",
        }
    }

    pub(crate) fn malformed(section: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigurationMalformed {
            section: section.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = KvError> = std::result::Result<T, E>;
