//! Data models for Cellbox
//!
//! Execution requests and results, cell output items and the per-run cell
//! execution record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// Execution Models
// ============================================================================

/// Request to execute one cell's source in the container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Source code to execute
    pub source_code: String,
}

impl ExecutionRequest {
    pub fn new(source_code: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
        }
    }

    /// Empty or whitespace-only source never reaches the container
    pub fn is_blank(&self) -> bool {
        self.source_code.trim().is_empty()
    }
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Ok,
    Error,
}

/// Structured result of one remote execution.
///
/// `status == Ok` holds exactly when `error_detail` is empty; the
/// constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    status: ExecutionStatus,
    stdout: String,
    error_detail: String,
}

impl ExecutionResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Ok,
            stdout: stdout.into(),
            error_detail: String::new(),
        }
    }

    /// An error result. An empty detail is replaced so the status/detail
    /// pairing always holds.
    pub fn error(stdout: impl Into<String>, error_detail: impl Into<String>) -> Self {
        let mut error_detail = error_detail.into();
        if error_detail.is_empty() {
            error_detail = "Unknown execution error".to_string();
        }
        Self {
            status: ExecutionStatus::Error,
            stdout: stdout.into(),
            error_detail,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExecutionStatus::Ok
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn error_detail(&self) -> &str {
        &self.error_detail
    }
}

// ============================================================================
// Cell Output Models
// ============================================================================

/// MIME type of plain text output
pub const MIME_TEXT_PLAIN: &str = "text/plain";

/// One output produced by a cell run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutputItem {
    Text {
        mime: String,
        data: Vec<u8>,
    },
    Error {
        name: String,
        message: String,
        trace: Vec<String>,
    },
}

impl OutputItem {
    /// Plain text output
    pub fn text(content: impl Into<String>) -> Self {
        OutputItem::Text {
            mime: MIME_TEXT_PLAIN.to_string(),
            data: content.into().into_bytes(),
        }
    }

    /// Build an error item from a traceback-style error detail.
    ///
    /// The last non-empty line of the form `Name: message` names the error;
    /// the full detail becomes the trace.
    pub fn from_error_detail(detail: &str) -> Self {
        let trace: Vec<String> = detail.lines().map(str::to_string).collect();
        let last = detail
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("");

        let (name, message) = match last.split_once(':') {
            Some((name, message)) if is_error_name(name) => {
                (name.to_string(), message.trim().to_string())
            }
            _ if is_error_name(last) => (last.to_string(), String::new()),
            _ => ("Error".to_string(), last.to_string()),
        };

        OutputItem::Error {
            name,
            message,
            trace,
        }
    }

    /// Text content for text items
    pub fn as_text(&self) -> Option<String> {
        match self {
            OutputItem::Text { data, .. } => Some(String::from_utf8_lossy(data).into_owned()),
            OutputItem::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, OutputItem::Error { .. })
    }
}

/// Dotted identifier such as `ValueError` or `json.decoder.JSONDecodeError`
fn is_error_name(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .split('.')
            .all(|part| {
                let mut chars = part.chars();
                matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
                    && chars.all(|c| c.is_alphanumeric() || c == '_')
            })
}

// ============================================================================
// Cell Execution Record
// ============================================================================

/// Cell execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl CellState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellState::Idle => "idle",
            CellState::Running => "running",
            CellState::Succeeded => "succeeded",
            CellState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CellState::Succeeded | CellState::Failed)
    }
}

/// One run of one cell. Terminal states are final.
#[derive(Debug, Clone, Serialize)]
pub struct CellExecutionRecord {
    pub execution_id: Uuid,
    pub cell_id: String,
    state: CellState,
    /// Position of this run among all runs of the controller (1-based),
    /// set once the cell enters Running
    pub execution_order: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    outputs: Vec<OutputItem>,
}

impl CellExecutionRecord {
    pub fn new(cell_id: impl Into<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            cell_id: cell_id.into(),
            state: CellState::Idle,
            execution_order: None,
            started_at: None,
            ended_at: None,
            outputs: Vec::new(),
        }
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    pub fn outputs(&self) -> &[OutputItem] {
        &self.outputs
    }

    /// Idle -> Running: stamps the start time and clears prior outputs
    pub fn begin(&mut self, execution_order: u32) -> Result<()> {
        self.transition(CellState::Running)?;
        self.outputs.clear();
        self.execution_order = Some(execution_order);
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Idle -> Succeeded for blank cells, which never run
    pub fn skip(&mut self) -> Result<()> {
        if self.state != CellState::Idle {
            return Err(self.invalid(CellState::Succeeded));
        }
        let now = Utc::now();
        self.state = CellState::Succeeded;
        self.outputs.clear();
        self.started_at = Some(now);
        self.ended_at = Some(now);
        Ok(())
    }

    /// Running -> Succeeded, with one text output when there is any
    pub fn succeed(&mut self, output: &str) -> Result<()> {
        self.transition(CellState::Succeeded)?;
        if !output.is_empty() {
            self.outputs.push(OutputItem::text(output));
        }
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Failed, with one error output
    pub fn fail(&mut self, error: OutputItem) -> Result<()> {
        self.transition(CellState::Failed)?;
        self.outputs.push(error);
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, to: CellState) -> Result<()> {
        let allowed = matches!(
            (self.state, to),
            (CellState::Idle, CellState::Running)
                | (CellState::Running, CellState::Succeeded)
                | (CellState::Running, CellState::Failed)
        );
        if !allowed {
            return Err(self.invalid(to));
        }
        self.state = to;
        Ok(())
    }

    fn invalid(&self, to: CellState) -> Error {
        Error::InvalidTransition {
            from: self.state.as_str(),
            to: to.as_str(),
        }
    }
}

// ============================================================================
// Kernel Models
// ============================================================================

/// A kernel available inside the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub language: Option<String>,
}

impl KernelSpec {
    /// Fallback entry used when enumeration fails
    pub fn fallback(name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: if name == "python3" {
                "Python 3".to_string()
            } else {
                name.to_string()
            },
            language: Some("python".to_string()),
        }
    }
}
