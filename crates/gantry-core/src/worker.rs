//! Worker abstraction.
//!
//! A kernel is backed by a [`KernelWorker`]: something that can be started,
//! waited on, interrupted, restarted, and shut down, and that exposes a
//! [`KernelChannel`] for submitting code and receiving events. The pool only
//! sees these traits, so a process-backed worker (see [`crate::ipc`]), a
//! remote worker, and a test double are interchangeable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::Result;
use crate::ids::RequestId;
use crate::kernel::KernelSpec;

/// Undecoded message received from a worker's event stream.
///
/// This is the only place an open JSON payload exists; the channel decodes
/// it into [`KernelMessage`](crate::channel::KernelMessage) immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Request this message belongs to, if any.
    pub parent_id: Option<RequestId>,
    /// Message type (`stream`, `execute_result`, `status`, ...).
    pub msg_type: String,
    /// Message payload.
    pub content: Value,
}

/// Short request/reply queries answered on the worker's shell channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellRequest {
    /// Readiness probe.
    KernelInfo,
    /// Code completion at a cursor position.
    Complete { code: String, cursor_pos: usize },
    /// Object inspection at a cursor position.
    Inspect { code: String, cursor_pos: usize },
}

impl ShellRequest {
    /// Wire message type of this request.
    pub fn msg_type(&self) -> &'static str {
        match self {
            ShellRequest::KernelInfo => "kernel_info_request",
            ShellRequest::Complete { .. } => "complete_request",
            ShellRequest::Inspect { .. } => "inspect_request",
        }
    }

    /// Wire payload of this request.
    pub fn content(&self) -> Value {
        match self {
            ShellRequest::KernelInfo => json!({}),
            ShellRequest::Complete { code, cursor_pos } => {
                json!({ "code": code, "cursor_pos": cursor_pos })
            }
            ShellRequest::Inspect { code, cursor_pos } => {
                json!({ "code": code, "cursor_pos": cursor_pos, "detail_level": 0 })
            }
        }
    }
}

/// Duplex message channel to one worker.
#[async_trait]
pub trait KernelChannel: Send + Sync {
    /// Submit code for execution. Returns immediately with the correlation id.
    async fn submit_code(&self, code: &str, silent: bool, store_history: bool)
    -> Result<RequestId>;

    /// Wait up to `timeout` for the next event.
    ///
    /// `Ok(None)` means nothing arrived in time; `Err` means the channel is
    /// unusable (the worker died or was shut down).
    async fn receive_next_event(&self, timeout: Duration) -> Result<Option<RawMessage>>;

    /// Send a shell request and wait up to `timeout` for its reply payload.
    async fn request(&self, request: ShellRequest, timeout: Duration) -> Result<Value>;
}

/// Lifecycle handle of one worker.
#[async_trait]
pub trait KernelWorker: Send {
    /// Launch the worker.
    async fn start(&mut self) -> Result<()>;

    /// Block until the worker answers a readiness probe, or fail after `timeout`.
    async fn wait_ready(&mut self, timeout: Duration) -> Result<()>;

    /// Ask the worker to stop its current work.
    async fn interrupt(&mut self) -> Result<()>;

    /// Kill and relaunch the worker. The channel returned by
    /// [`channel`](Self::channel) stays the same object.
    async fn restart(&mut self) -> Result<()>;

    /// Tear the worker down. Calling this on a stopped worker is a no-op.
    async fn shutdown(&mut self) -> Result<()>;

    /// Whether the worker is still running.
    fn is_alive(&mut self) -> bool;

    /// Channel for submitting code and receiving events.
    fn channel(&self) -> Arc<dyn KernelChannel>;
}

/// Creates unstarted workers for kernel specs.
pub trait WorkerLauncher: Send + Sync {
    /// Look up the spec with this name.
    fn spec(&self, name: &str) -> Option<KernelSpec>;

    /// Build an unstarted worker for `spec`.
    fn launch(&self, spec: &KernelSpec) -> Result<Box<dyn KernelWorker>>;
}
