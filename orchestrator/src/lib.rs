//! Cellbox orchestrator library
//!
//! Runs notebook cells inside a per-workspace container: the container
//! lifecycle, the remote execution protocol, the cell controller built on
//! both, and the notebook document codec.

pub mod config;
pub mod container;
pub mod error;
pub mod execution;
pub mod logging;
pub mod models;
pub mod notebook;
pub mod protocol;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
