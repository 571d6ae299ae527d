//! Container management module for Cellbox
//!
//! Handles all interactions with the Docker/Podman daemon:
//! - Deriving and building the workspace image
//! - Creating, starting, stopping and removing the workspace container
//! - Kernel setup and enumeration inside the container
//! - The exec transport used by the remote execution protocol

pub mod archive;
mod docker;
mod daemon;
pub mod image;
mod manager;

pub use docker::BollardDaemon;
pub use daemon::{ContainerSpec, ContainerSummary, Daemon, ExecOutput, ExecTransport};
pub use image::ImageDescriptor;
pub use manager::{ContainerHandle, ContainerManager};

#[cfg(test)]
pub use daemon::MockExecTransport;
