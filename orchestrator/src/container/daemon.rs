//! Daemon API seam
//!
//! The lifecycle manager only needs a handful of container/image primitives
//! and a single exec call. They sit behind traits so the manager and the
//! protocol can run against the bollard backend or an in-memory daemon.

use async_trait::async_trait;

use crate::error::Result;

/// A container as reported by the daemon's container list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Daemon-assigned id
    pub id: String,
    /// Names without the leading `/`
    pub names: Vec<String>,
    /// Image the container was created from
    pub image: Option<String>,
    pub running: bool,
}

impl ContainerSummary {
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

/// Everything needed to create the workspace container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Bind mounts in `host:container[:mode]` form
    pub binds: Vec<String>,
    pub command: Vec<String>,
    pub working_dir: String,
}

/// Container and image primitives of the daemon API
#[async_trait]
pub trait Daemon: Send + Sync {
    /// All containers (running or not) whose name matches the filter.
    /// The daemon treats the filter as a substring match.
    async fn list_containers(&self, name_filter: &str) -> Result<Vec<ContainerSummary>>;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Build `image` from a tar archive holding the build context
    async fn build_image(&self, image: &str, context: Vec<u8>) -> Result<()>;

    /// Create a container, returning its daemon id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, name: &str) -> Result<()>;

    /// Stop a container; stopping an already stopped container succeeds
    async fn stop_container(&self, name: &str) -> Result<()>;

    async fn remove_container(&self, name: &str) -> Result<()>;

    async fn remove_image(&self, image: &str) -> Result<()>;

    /// Extract a tar archive into the container at `dest`
    async fn upload_archive(&self, name: &str, dest: &str, archive: Vec<u8>) -> Result<()>;
}

/// Raw result of one exec call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Combined stdout+stderr exactly as the transport delivered it
    pub raw: Vec<u8>,
    /// Exit code when the daemon reports one
    pub exit_code: Option<i64>,
}

impl ExecOutput {
    pub fn succeeded(&self) -> bool {
        matches!(self.exit_code, None | Some(0))
    }
}

/// Runs a single command inside a running container.
///
/// Connection-level failures surface as `DaemonUnreachable` or
/// `ContainerNotFound`; everything else as `ExecutionTransportFailed`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecTransport: Send + Sync {
    async fn exec(&self, container: &str, argv: &[String]) -> Result<ExecOutput>;
}
