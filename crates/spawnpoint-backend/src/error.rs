//! Backend error types.

use thiserror::Error;

/// Errors raised by a container backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("container backend unavailable: {0}")]
    Unavailable(String),

    #[error("image build failed: {0}")]
    Build(String),

    #[error("container start failed: {0}")]
    Start(String),

    #[error("no such container: {0}")]
    NotFound(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
