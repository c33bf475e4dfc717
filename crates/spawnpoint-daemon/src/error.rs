//! Daemon error types.

use thiserror::Error;

use spawnpoint_backend::ContextError;
use spawnpoint_bus::BusError;
use spawnpoint_core::ConfigError;

use crate::ledger::ReserveError;

/// Errors surfaced by the daemon.
///
/// Admission-time errors are published to the submitting service's log
/// topic and never escalate; only `BackendUnavailable` at startup is fatal.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to parse service configuration: {0}")]
    ConfigParse(String),

    #[error("failed to decode credential: {0}")]
    BadCredential(String),

    #[error("failed to read included files archive: {0}")]
    BadIncludedArchive(String),

    #[error("unknown source kind: {0}")]
    UnknownSourceKind(String),

    #[error("insufficient memory: requested {requested} MiB, available {available} MiB")]
    InsufficientMem { requested: u64, available: u64 },

    #[error("insufficient cpu shares: requested {requested}, available {available}")]
    InsufficientCpu { requested: u64, available: u64 },

    #[error("image build failed: {0}")]
    BuildFailed(String),

    #[error("container start failed: {0}")]
    StartFailed(String),

    #[error("container backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("bus publish failed: {0}")]
    BusPublishFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ConfigError> for DaemonError {
    fn from(err: ConfigError) -> Self {
        DaemonError::ConfigParse(err.to_string())
    }
}

impl From<ContextError> for DaemonError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::BadCredential(e) => DaemonError::BadCredential(e),
            ContextError::BadIncludedArchive(e) => DaemonError::BadIncludedArchive(e),
            ContextError::UnknownSourceKind(e) => DaemonError::UnknownSourceKind(e),
            ContextError::BadParams(e) => DaemonError::Internal(e),
            ContextError::Io(e) => DaemonError::Internal(e.to_string()),
        }
    }
}

impl From<ReserveError> for DaemonError {
    fn from(err: ReserveError) -> Self {
        match err {
            ReserveError::InsufficientMem {
                requested,
                available,
            } => DaemonError::InsufficientMem {
                requested,
                available,
            },
            ReserveError::InsufficientCpu {
                requested,
                available,
            } => DaemonError::InsufficientCpu {
                requested,
                available,
            },
        }
    }
}

impl From<BusError> for DaemonError {
    fn from(err: BusError) -> Self {
        DaemonError::BusPublishFailed(err.to_string())
    }
}
