//! Execution channel: a typed view over one kernel's message transport.
//!
//! The channel submits code, turns the worker's raw event stream into
//! [`OutputEvent`]s for a single request, and answers the short
//! completion/inspection/variable-listing queries.

mod events;
mod introspect;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::config::CoreConfig;
use crate::error::Result;
use crate::ids::{KernelId, RequestId};
use crate::worker::{KernelChannel, ShellRequest};

pub use events::{KernelMessage, KernelState, MimeBundle, OutputEvent, StreamName};
pub use introspect::{NamespaceInspector, PythonInspector, VariableInfo, inspector_for};

/// Timing knobs for a channel, taken from [`CoreConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTimeouts {
    /// Wait per poll of the event queue.
    pub poll: Duration,
    /// Pause after an empty poll.
    pub backoff: Duration,
    /// Bound for request/reply queries.
    pub query: Duration,
}

impl From<&CoreConfig> for ChannelTimeouts {
    fn from(config: &CoreConfig) -> Self {
        Self {
            poll: config.poll_timeout,
            backoff: config.poll_backoff,
            query: config.query_timeout,
        }
    }
}

/// Typed execution interface to one kernel.
///
/// Cheap to clone; the pool builds one on each lookup.
#[derive(Clone)]
pub struct ExecutionChannel {
    kernel_id: KernelId,
    transport: Arc<dyn KernelChannel>,
    inspector: Option<Arc<dyn NamespaceInspector>>,
    timeouts: ChannelTimeouts,
}

impl std::fmt::Debug for ExecutionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionChannel")
            .field("kernel_id", &self.kernel_id)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl ExecutionChannel {
    pub fn new(
        kernel_id: KernelId,
        transport: Arc<dyn KernelChannel>,
        inspector: Option<Arc<dyn NamespaceInspector>>,
        timeouts: ChannelTimeouts,
    ) -> Self {
        Self {
            kernel_id,
            transport,
            inspector,
            timeouts,
        }
    }

    /// Kernel this channel talks to.
    pub fn kernel_id(&self) -> &KernelId {
        &self.kernel_id
    }

    /// Submit code and return the request id its events will carry.
    pub async fn submit(&self, code: &str, silent: bool, store_history: bool) -> Result<RequestId> {
        self.transport.submit_code(code, silent, store_history).await
    }

    /// Output events for `request_id`, in arrival order.
    ///
    /// Events belonging to other requests are discarded. The stream ends when
    /// the worker reports idle for this request. A transport failure yields
    /// one `ChannelFailure` error event and ends the stream.
    pub fn stream(&self, request_id: RequestId) -> BoxStream<'static, OutputEvent> {
        let reader = EventReader {
            transport: Arc::clone(&self.transport),
            request_id,
            timeouts: self.timeouts,
            finished: false,
        };

        futures::stream::unfold(reader, |mut reader| async move {
            let event = reader.next_event().await?;
            Some((event, reader))
        })
        .boxed()
    }

    /// Completion candidates for `code` at `cursor_pos`.
    pub async fn complete(&self, code: &str, cursor_pos: usize) -> Result<Value> {
        let request = ShellRequest::Complete {
            code: code.to_string(),
            cursor_pos,
        };
        self.transport.request(request, self.timeouts.query).await
    }

    /// Object documentation for `code` at `cursor_pos`.
    pub async fn inspect(&self, code: &str, cursor_pos: usize) -> Result<Value> {
        let request = ShellRequest::Inspect {
            code: code.to_string(),
            cursor_pos,
        };
        self.transport.request(request, self.timeouts.query).await
    }

    /// List user variables in the kernel namespace.
    ///
    /// Empty when the kernel language has no inspector. Output gathered
    /// before the query timeout expires is still parsed. The listing runs as
    /// a submission on the shared event queue; callers without an
    /// [`ExecutionSlot`](crate::kernel::ExecutionSlot) for the kernel should
    /// use [`ExecutionCoordinator::introspect_variables`](crate::execute::ExecutionCoordinator::introspect_variables).
    pub async fn introspect_variables(&self) -> Result<Vec<VariableInfo>> {
        let Some(inspector) = &self.inspector else {
            return Ok(Vec::new());
        };

        let request_id = self.submit(inspector.script(), true, false).await?;
        let mut events = self.stream(request_id);
        let mut stdout = String::new();

        loop {
            match tokio::time::timeout(self.timeouts.query, events.next()).await {
                Ok(Some(OutputEvent::Stream {
                    name: StreamName::Stdout,
                    text,
                })) => stdout.push_str(&text),
                Ok(Some(OutputEvent::Error { ename, evalue, .. })) => {
                    tracing::warn!("Variable listing failed on {}: {}: {}", self.kernel_id, ename, evalue);
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!("Variable listing on {} timed out", self.kernel_id);
                    break;
                }
            }
        }

        Ok(inspector.parse(&stdout))
    }
}

/// Per-request cursor over the transport's event queue.
struct EventReader {
    transport: Arc<dyn KernelChannel>,
    request_id: RequestId,
    timeouts: ChannelTimeouts,
    finished: bool,
}

impl EventReader {
    async fn next_event(&mut self) -> Option<OutputEvent> {
        if self.finished {
            return None;
        }

        loop {
            match self.transport.receive_next_event(self.timeouts.poll).await {
                Ok(None) => tokio::time::sleep(self.timeouts.backoff).await,
                Ok(Some(raw)) => {
                    if raw.parent_id.as_ref() != Some(&self.request_id) {
                        tracing::trace!("Discarding {} for another request", raw.msg_type);
                        continue;
                    }
                    match KernelMessage::decode(&raw) {
                        Some(KernelMessage::Event(event)) => return Some(event),
                        Some(KernelMessage::Status(KernelState::Idle)) => {
                            self.finished = true;
                            return None;
                        }
                        Some(KernelMessage::Status(_)) | None => {}
                    }
                }
                Err(e) => {
                    self.finished = true;
                    return Some(OutputEvent::Error {
                        ename: e.kind().to_string(),
                        evalue: e.to_string(),
                        traceback: Vec::new(),
                    });
                }
            }
        }
    }
}
