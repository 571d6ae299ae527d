//! Cell execution controller
//!
//! Drives a batch of notebook cells through the workspace container, one at
//! a time and in order, producing one [`CellExecutionRecord`] per cell.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::container::{BollardDaemon, ContainerHandle, ContainerManager};
use crate::error::Result;
use crate::models::{CellExecutionRecord, ExecutionRequest, OutputItem};
use crate::protocol::RemoteExecutor;

/// One cell handed to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellInput {
    pub cell_id: String,
    pub source: String,
}

impl CellInput {
    pub fn new(cell_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            cell_id: cell_id.into(),
            source: source.into(),
        }
    }
}

/// Runs batches of cells against the container owned by its manager
pub struct CellExecutionController {
    manager: ContainerManager,
    executor: RemoteExecutor,
    /// Runs started so far; the next run gets `execution_counter + 1`
    execution_counter: u32,
}

impl CellExecutionController {
    pub fn new(manager: ContainerManager, executor: RemoteExecutor) -> Self {
        Self {
            manager,
            executor,
            execution_counter: 0,
        }
    }

    /// Controller backed by the local container daemon
    pub fn connect(config: AppConfig) -> Result<Self> {
        let daemon = Arc::new(BollardDaemon::connect(&config)?);
        let executor = RemoteExecutor::from_config(daemon.clone(), &config);
        let manager = ContainerManager::new(config, daemon.clone(), daemon)?;
        Ok(Self::new(manager, executor))
    }

    pub fn manager(&self) -> &ContainerManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ContainerManager {
        &mut self.manager
    }

    pub fn into_manager(self) -> ContainerManager {
        self.manager
    }

    /// Number of cell runs started by this controller
    pub fn execution_count(&self) -> u32 {
        self.execution_counter
    }

    /// Make sure the container runs and carries the helper.
    ///
    /// Runs once per batch. Lifecycle failures abort the batch.
    async fn ensure_ready(&mut self) -> Result<ContainerHandle> {
        if self.manager.kernel_ready() && self.manager.is_container_running().await {
            if let Some(handle) = self.manager.handle() {
                return Ok(handle.clone());
            }
        }

        info!(container = %self.manager.container_name(), "Preparing container for execution");
        let handle = self.manager.ensure_container().await?;
        self.manager.setup_kernel().await?;
        Ok(handle)
    }

    /// Execute `cells` strictly in order.
    ///
    /// Returns an error only when the container could not be prepared, in
    /// which case no cell has run. Per-cell failures end up in the failing
    /// cell's record and do not stop the batch.
    #[instrument(skip_all, fields(cells = cells.len()))]
    pub async fn execute_batch(&mut self, cells: &[CellInput]) -> Result<Vec<CellExecutionRecord>> {
        let needs_container = cells
            .iter()
            .any(|cell| !ExecutionRequest::new(cell.source.as_str()).is_blank());

        let handle = if needs_container {
            Some(self.ensure_ready().await?)
        } else {
            None
        };

        let mut records = Vec::with_capacity(cells.len());
        for cell in cells {
            let mut record = CellExecutionRecord::new(cell.cell_id.as_str());
            let request = ExecutionRequest::new(cell.source.as_str());

            match handle.as_ref() {
                Some(handle) if !request.is_blank() => {
                    self.run_cell(handle, &request, &mut record).await?;
                }
                _ => {
                    debug!(cell = %cell.cell_id, "Skipping blank cell");
                    record.skip()?;
                }
            }
            records.push(record);
        }

        Ok(records)
    }

    async fn run_cell(
        &mut self,
        handle: &ContainerHandle,
        request: &ExecutionRequest,
        record: &mut CellExecutionRecord,
    ) -> Result<()> {
        self.execution_counter += 1;
        record.begin(self.execution_counter)?;

        match self.executor.execute(handle, request).await {
            Ok(result) if result.is_ok() => record.succeed(result.stdout()),
            Ok(result) => {
                debug!(cell = %record.cell_id, "Cell raised an error");
                record.fail(OutputItem::from_error_detail(result.error_detail()))
            }
            Err(e) => {
                warn!(cell = %record.cell_id, error = %e, "Cell execution failed");
                if e.is_connection_error() {
                    self.manager.invalidate();
                }
                record.fail(OutputItem::from_error_detail(&e.to_string()))
            }
        }
    }
}
