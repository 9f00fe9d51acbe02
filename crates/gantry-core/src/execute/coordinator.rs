//! End-to-end execution of one submission.

use std::sync::{Arc, PoisonError, RwLock};

use futures::StreamExt;
use indexmap::IndexMap;
use tokio::sync::mpsc;

use super::result::{ExecuteRequest, ExecutionResult};
use crate::channel::{OutputEvent, VariableInfo};
use crate::error::{Error, Result};
use crate::ids::{ExecutionId, KernelId};
use crate::kernel::{ExecutionSlot, KernelPool};
use crate::magic::MagicPreprocessor;

/// Receives output events as they arrive.
pub trait OutputSink: Send + Sync {
    fn on_output(&self, event: &OutputEvent);
}

impl<F> OutputSink for F
where
    F: Fn(&OutputEvent) + Send + Sync,
{
    fn on_output(&self, event: &OutputEvent) {
        self(event)
    }
}

impl OutputSink for mpsc::UnboundedSender<OutputEvent> {
    fn on_output(&self, event: &OutputEvent) {
        // Receiver gone means nobody is watching; the result still records it.
        let _ = self.send(event.clone());
    }
}

/// Runs submissions against pooled kernels and keeps their results.
pub struct ExecutionCoordinator {
    pool: Arc<KernelPool>,
    magic: MagicPreprocessor,
    results: RwLock<IndexMap<ExecutionId, ExecutionResult>>,
    history: usize,
}

impl ExecutionCoordinator {
    pub fn new(pool: Arc<KernelPool>) -> Self {
        let history = pool.config().execution_history.max(1);
        Self {
            pool,
            magic: MagicPreprocessor::new(),
            results: RwLock::new(IndexMap::new()),
            history,
        }
    }

    pub fn pool(&self) -> &Arc<KernelPool> {
        &self.pool
    }

    /// Run one submission to completion.
    ///
    /// Waits for any earlier execution on the same kernel to finish first.
    /// Never fails: infrastructure errors become an `Error` result carrying
    /// the error kind. Each output is passed to `sink` as it arrives.
    pub async fn execute(
        &self,
        request: ExecuteRequest,
        sink: Option<&dyn OutputSink>,
    ) -> ExecutionResult {
        let mut result = ExecutionResult::start(request.kernel_id.clone(), request.cell_id.clone());
        tracing::debug!("Execution {} on kernel {}", result.execution_id, request.kernel_id);
        self.remember(result.clone());

        match self.run(&request, &mut result, sink).await {
            Ok(()) => result.finish(),
            Err(e) => {
                tracing::warn!("Execution {} failed: {}", result.execution_id, e);
                result.fail(&e);
            }
        }

        tracing::debug!(
            "Execution {} finished: {:?} in {}ms",
            result.execution_id,
            result.status,
            result.duration_ms.unwrap_or(0)
        );
        self.remember(result.clone());
        result
    }

    async fn run(
        &self,
        request: &ExecuteRequest,
        result: &mut ExecutionResult,
        sink: Option<&dyn OutputSink>,
    ) -> Result<()> {
        let slot = self.pool.acquire(&request.kernel_id).await?;

        let preprocessed = self.magic.process(&request.code);
        if let Some(immediate) = preprocessed.immediate {
            record(result, sink, OutputEvent::stdout(immediate.render()));
        }

        if preprocessed.code.trim().is_empty() {
            result.execution_count = Some(slot.execution_count());
            return Ok(());
        }

        let channel = slot.channel();
        let request_id = channel
            .submit(&preprocessed.code, request.silent, request.store_history)
            .await?;

        let mut events = channel.stream(request_id);
        let mut transport_failed = false;
        while let Some(event) = events.next().await {
            transport_failed |= event.is_channel_failure();
            record(result, sink, event);
        }

        result.execution_count = Some(count_execution(&slot, request.silent));

        if transport_failed {
            drop(slot);
            if self.pool.remove_if_dead(&request.kernel_id).await {
                tracing::warn!("Kernel {} died during execution {}", request.kernel_id, result.execution_id);
            }
        }
        Ok(())
    }

    /// List user variables in a kernel's namespace.
    ///
    /// The listing script shares the kernel's event queue, so it runs under
    /// the kernel's execution slot like any other submission.
    pub async fn introspect_variables(&self, kernel_id: &KernelId) -> Result<Vec<VariableInfo>> {
        let slot = self.pool.acquire(kernel_id).await?;
        slot.channel().introspect_variables().await
    }

    /// Look up a stored result.
    pub fn get(&self, execution_id: &ExecutionId) -> Result<ExecutionResult> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(execution_id)
            .cloned()
            .ok_or_else(|| Error::ExecutionNotFound(execution_id.clone()))
    }

    /// Interrupt whatever is running on a kernel.
    pub async fn cancel(&self, kernel_id: &KernelId) -> Result<()> {
        self.pool.interrupt(kernel_id).await
    }

    fn remember(&self, result: ExecutionResult) {
        let mut results = self.results.write().unwrap_or_else(PoisonError::into_inner);
        results.insert(result.execution_id.clone(), result);
        while results.len() > self.history {
            results.shift_remove_index(0);
        }
    }
}

fn record(result: &mut ExecutionResult, sink: Option<&dyn OutputSink>, event: OutputEvent) {
    if let Some(sink) = sink {
        sink.on_output(&event);
    }
    result.push(event);
}

fn count_execution(slot: &ExecutionSlot, silent: bool) -> u64 {
    if silent {
        slot.execution_count()
    } else {
        slot.record_execution()
    }
}
