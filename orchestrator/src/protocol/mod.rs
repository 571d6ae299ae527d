//! Remote execution protocol
//!
//! Ships one cell's source into the container as a single base64 token,
//! runs it through the uploaded helper script and turns the helper's JSON
//! line back into an [`ExecutionResult`]. Transport framing is removed
//! before decoding, and undecodable output becomes an error result instead
//! of a failure.

pub mod frame;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::container::{ContainerHandle, ExecTransport};
use crate::error::{Error, Result};
use crate::models::{ExecutionRequest, ExecutionResult};

/// Directory holding the helper inside the container
pub const HELPER_DIR: &str = "/opt/cellbox";

/// Location of the helper inside the container
pub const HELPER_PATH: &str = "/opt/cellbox/cellbox_exec.py";

/// The helper program uploaded by kernel setup
pub const HELPER_SCRIPT: &str = include_str!("helper.py");

/// Encode source text as one shell-safe argument
pub fn encode_source(source: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(source.as_bytes())
}

/// Result line written by the helper
#[derive(Debug, Deserialize)]
struct WireResult {
    status: String,
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: String,
}

/// Parse one candidate JSON document, enforcing the result shape
fn parse_wire(text: &str) -> Result<ExecutionResult> {
    let wire: WireResult =
        serde_json::from_str(text).map_err(|e| Error::ResultParseFailed(e.to_string()))?;

    match wire.status.as_str() {
        "ok" if wire.error.is_empty() => Ok(ExecutionResult::ok(wire.output)),
        "error" if !wire.error.is_empty() => Ok(ExecutionResult::error(wire.output, wire.error)),
        "ok" | "error" => Err(Error::ResultParseFailed(format!(
            "status {} does not match error field",
            wire.status
        ))),
        other => Err(Error::ResultParseFailed(format!("unknown status {other:?}"))),
    }
}

/// Decode an exec response into a result.
///
/// Frame headers are stripped first. The helper's JSON is the last line
/// that decodes as a result; anything printed around it (interpreter
/// warnings, late writes from threads the cell left running) is ignored.
/// Output that does not decode becomes an error result carrying the raw
/// text.
pub fn decode_output(raw: &[u8]) -> ExecutionResult {
    let payload = frame::demultiplex(raw);
    let text = String::from_utf8_lossy(&payload);
    let trimmed = text.trim();

    let from_line = trimmed
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find_map(|line| parse_wire(line).ok());
    let parsed = match from_line {
        Some(result) => Ok(result),
        None if trimmed.is_empty() => {
            Err(Error::ResultParseFailed("empty response".to_string()))
        }
        None => parse_wire(trimmed),
    };

    match parsed {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, bytes = raw.len(), "Could not decode execution result");
            let detail = if trimmed.is_empty() {
                format!("{e}")
            } else {
                trimmed.to_string()
            };
            ExecutionResult::error("", detail)
        }
    }
}

/// Runs cells through the helper inside the workspace container
pub struct RemoteExecutor {
    transport: Arc<dyn ExecTransport>,
    python_path: String,
    timeout: Option<Duration>,
}

impl RemoteExecutor {
    pub fn new(transport: Arc<dyn ExecTransport>, python_path: impl Into<String>) -> Self {
        Self {
            transport,
            python_path: python_path.into(),
            timeout: None,
        }
    }

    pub fn from_config(transport: Arc<dyn ExecTransport>, config: &AppConfig) -> Self {
        let executor = Self::new(transport, config.python_path.clone());
        match config.execution_timeout_seconds {
            Some(seconds) => executor.with_timeout(Duration::from_secs(seconds)),
            None => executor,
        }
    }

    /// Bound each execution; unbounded by default
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// The fixed helper invocation for one source text
    pub fn invocation(&self, source: &str) -> Vec<String> {
        vec![
            self.python_path.clone(),
            HELPER_PATH.to_string(),
            encode_source(source),
        ]
    }

    /// Execute one request in the container.
    ///
    /// Transport failures (and timeouts) are errors; everything the helper
    /// sends back, decodable or not, is a result.
    pub async fn execute(
        &self,
        handle: &ContainerHandle,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let argv = self.invocation(&request.source_code);
        debug!(
            container = %handle.name,
            source_bytes = request.source_code.len(),
            "Executing cell"
        );

        let call = self.transport.exec(&handle.name, &argv);
        let output = match self.timeout {
            Some(limit) => timeout(limit, call)
                .await
                .map_err(|_| Error::ExecutionTimedOut(limit))??,
            None => call.await?,
        };

        let result = decode_output(&output.raw);
        if !output.succeeded() && result.is_ok() {
            debug!(exit_code = ?output.exit_code, "Helper exited non-zero after reporting success");
        }
        Ok(result)
    }
}
