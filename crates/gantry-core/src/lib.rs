//! Core engine for the gantry kernel runtime.
//!
//! This crate provides:
//! - Kernel pool with bounded capacity and LRU eviction
//! - Process-backed workers speaking a framed JSON protocol
//! - Execution channel decoding worker messages into typed events
//! - Magic directive preprocessing
//! - Execution coordination with live output forwarding

pub mod channel;
pub mod config;
pub mod error;
pub mod execute;
pub mod ids;
pub mod ipc;
pub mod kernel;
pub mod magic;
pub mod services;
pub mod worker;

pub use channel::{
    ChannelTimeouts, ExecutionChannel, KernelMessage, KernelState, MimeBundle, NamespaceInspector,
    OutputEvent, PythonInspector, StreamName, VariableInfo, inspector_for,
};
pub use config::CoreConfig;
pub use error::{Error, Result};
pub use execute::{
    ExecuteRequest, ExecutionCoordinator, ExecutionError, ExecutionResult, ExecutionStatus,
    OutputSink,
};
pub use ids::{ExecutionId, KernelId, RequestId};
pub use ipc::{ProcessChannel, ProcessLauncher, ProcessWorker};
pub use kernel::{
    ExecutionSlot, Kernel, KernelCreate, KernelPool, KernelSpec, KernelStatus, now_millis,
};
pub use magic::{MagicNotice, MagicOutput, MagicPreprocessor, NoticeLevel, Preprocessed};
pub use services::KernelServices;
pub use worker::{KernelChannel, KernelWorker, RawMessage, ShellRequest, WorkerLauncher};
