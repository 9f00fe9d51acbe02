//! Execution requests and results.

use serde::{Deserialize, Serialize};

use crate::channel::OutputEvent;
use crate::error::Error;
use crate::ids::{ExecutionId, KernelId};
use crate::kernel::now_millis;

/// Request to run one submission on a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub kernel_id: KernelId,
    pub code: String,
    /// Notebook cell the submission came from, if any.
    #[serde(default)]
    pub cell_id: Option<String>,
    /// Suppress output and do not count the execution in the worker.
    #[serde(default)]
    pub silent: bool,
    /// Record the submission in the worker's input history.
    #[serde(default = "default_true")]
    pub store_history: bool,
}

fn default_true() -> bool {
    true
}

impl ExecuteRequest {
    pub fn new(kernel_id: KernelId, code: impl Into<String>) -> Self {
        Self {
            kernel_id,
            code: code.into(),
            cell_id: None,
            silent: false,
            store_history: true,
        }
    }

    pub fn with_cell(mut self, cell_id: impl Into<String>) -> Self {
        self.cell_id = Some(cell_id.into());
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self.store_history = false;
        self
    }
}

/// Terminal or in-progress state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Error,
}

/// Structured error attached to a failed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Error kind: the exception class for user errors, or one of
    /// `KernelNotFound`, `StartFailure`, `ChannelFailure`, `ProtocolError`,
    /// `InternalError` for infrastructure failures.
    pub ename: String,
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

impl From<&Error> for ExecutionError {
    fn from(err: &Error) -> Self {
        Self {
            ename: err.kind().to_string(),
            evalue: err.to_string(),
            traceback: Vec::new(),
        }
    }
}

/// Outcome of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub kernel_id: KernelId,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub cell_id: Option<String>,
    /// Output in arrival order.
    pub outputs: Vec<OutputEvent>,
    /// First error raised, if the execution failed.
    pub error: Option<ExecutionError>,
    /// Unix milliseconds.
    pub started_at: u64,
    pub completed_at: Option<u64>,
    pub duration_ms: Option<u64>,
    /// Kernel execution counter after this execution.
    pub execution_count: Option<u64>,
}

impl ExecutionResult {
    pub(crate) fn start(kernel_id: KernelId, cell_id: Option<String>) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            kernel_id,
            status: ExecutionStatus::Running,
            cell_id,
            outputs: Vec::new(),
            error: None,
            started_at: now_millis(),
            completed_at: None,
            duration_ms: None,
            execution_count: None,
        }
    }

    /// Append one output, capturing the first error.
    pub(crate) fn push(&mut self, event: OutputEvent) {
        if let OutputEvent::Error {
            ename,
            evalue,
            traceback,
        } = &event
            && self.error.is_none()
        {
            self.error = Some(ExecutionError {
                ename: ename.clone(),
                evalue: evalue.clone(),
                traceback: traceback.clone(),
            });
        }
        self.outputs.push(event);
    }

    /// Mark as failed by an infrastructure error.
    pub(crate) fn fail(&mut self, err: &Error) {
        self.error = Some(ExecutionError::from(err));
        self.finish();
    }

    /// Stamp completion time and classify the terminal status.
    pub(crate) fn finish(&mut self) {
        let now = now_millis();
        self.status = if self.error.is_some() {
            ExecutionStatus::Error
        } else {
            ExecutionStatus::Success
        };
        self.completed_at = Some(now);
        self.duration_ms = Some(now.saturating_sub(self.started_at));
    }

    pub fn is_finished(&self) -> bool {
        self.status != ExecutionStatus::Running
    }

    /// Concatenated stdout text.
    pub fn stdout(&self) -> String {
        self.outputs
            .iter()
            .filter_map(|event| match event {
                OutputEvent::Stream {
                    name: crate::channel::StreamName::Stdout,
                    text,
                } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_wins() {
        let mut result = ExecutionResult::start(KernelId::from("k"), None);
        result.push(OutputEvent::stdout("a\n"));
        result.push(OutputEvent::Error {
            ename: "ValueError".into(),
            evalue: "first".into(),
            traceback: vec![],
        });
        result.push(OutputEvent::Error {
            ename: "KeyError".into(),
            evalue: "second".into(),
            traceback: vec![],
        });
        result.finish();

        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.error.as_ref().unwrap().ename, "ValueError");
        assert_eq!(result.outputs.len(), 3);
        assert!(result.completed_at.unwrap() >= result.started_at);
    }

    #[test]
    fn test_infrastructure_failure() {
        let mut result = ExecutionResult::start(KernelId::from("k"), Some("cell-1".into()));
        result.fail(&Error::KernelNotFound(KernelId::from("k")));

        assert_eq!(result.status, ExecutionStatus::Error);
        let error = result.error.unwrap();
        assert_eq!(error.ename, "KernelNotFound");
        assert_eq!(error.evalue, "kernel not found: k");
        assert!(result.outputs.is_empty());
    }

    #[test]
    fn test_request_defaults() {
        let req: ExecuteRequest = serde_json::from_str(r#"{"kernel_id": "k", "code": "1"}"#).unwrap();
        assert!(req.store_history);
        assert!(!req.silent);
        assert!(req.cell_id.is_none());
    }
}
