//! Error types for the Cellbox core

use thiserror::Error;

/// Errors raised by the container lifecycle, the exec protocol and the
/// cell controller
#[derive(Debug, Error)]
pub enum Error {
    #[error("Container daemon unreachable: {0}")]
    DaemonUnreachable(String),

    #[error("Image build failed for {image}: {message}")]
    ImageBuildFailed { image: String, message: String },

    #[error("Failed to create container {name}: {message}")]
    ContainerCreateFailed { name: String, message: String },

    #[error("Failed to start container {name}: {message}")]
    ContainerStartFailed { name: String, message: String },

    #[error("No such container: {0}")]
    ContainerNotFound(String),

    #[error("No such image: {0}")]
    ImageNotFound(String),

    #[error("A container named {0} already exists")]
    ContainerNameConflict(String),

    #[error("Container {0} is not running")]
    ContainerNotRunning(String),

    #[error("Kernel setup failed: {0}")]
    KernelSetupFailed(String),

    #[error("Exec transport failed: {0}")]
    ExecutionTransportFailed(String),

    #[error("Execution timed out after {0:?}")]
    ExecutionTimedOut(std::time::Duration),

    #[error("Failed to parse execution result: {0}")]
    ResultParseFailed(String),

    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("Invalid cell transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Daemon request failed ({status:?}): {message}")]
    Daemon { status: Option<u16>, message: String },

    #[error("Invalid notebook document: {0}")]
    Notebook(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Connection-level failures: the daemon is gone or the target container
    /// vanished. Callers recover by re-resolving the container.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::DaemonUnreachable(_) | Error::ContainerNotFound(_)
        )
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
