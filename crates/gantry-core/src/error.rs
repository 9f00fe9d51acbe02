//! Error types for gantry-core.

use thiserror::Error;

use crate::ids::{ExecutionId, KernelId};

/// Error kind of a transport failure, as carried in output events.
pub(crate) const CHANNEL_FAILURE: &str = "ChannelFailure";

/// Result type for gantry-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in gantry-core.
///
/// Runtime errors raised by user code inside a worker are not represented
/// here: they travel as data inside an `ExecutionResult`.
#[derive(Debug, Error)]
pub enum Error {
    /// No kernel with this id is tracked by the pool.
    #[error("kernel not found: {0}")]
    KernelNotFound(KernelId),

    /// No execution with this id has been recorded.
    #[error("execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    /// Worker could not be launched, or did not become ready in time.
    #[error("kernel failed to start: {0}")]
    StartFailure(String),

    /// Transport to the worker failed (closed, dead, or no reply in time).
    #[error("channel failure: {0}")]
    Channel(String),

    /// Malformed or oversized frame on the worker pipe.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short error kind used when a failure is reported inside an execution result.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KernelNotFound(_) => "KernelNotFound",
            Error::ExecutionNotFound(_) => "ExecutionNotFound",
            Error::StartFailure(_) => "StartFailure",
            Error::Channel(_) => CHANNEL_FAILURE,
            Error::Protocol(_) | Error::Json(_) => "ProtocolError",
            Error::Config(_) | Error::Io(_) => "InternalError",
        }
    }
}
