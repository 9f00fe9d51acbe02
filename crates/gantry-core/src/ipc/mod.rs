//! Inter-process communication with kernel worker processes.
//!
//! This module provides the framing protocol and the process-backed
//! implementation of the [`KernelWorker`](crate::worker::KernelWorker) and
//! [`KernelChannel`](crate::worker::KernelChannel) traits.
//!
//! ```text
//! ProcessWorker (parent)
//!     │
//!     ├── stdin  ──► WireRequest frames (execute / complete / inspect / ...)
//!     │
//!     └── stdout ◄── WireMessage frames
//!                      ├── shell  → reply waiter keyed by parent_id
//!                      └── iopub  → event queue read by the ExecutionChannel
//! ```

pub mod protocol;
mod process;

pub use process::{ProcessChannel, ProcessLauncher, ProcessWorker};
pub use protocol::{WireChannel, WireMessage, WireRequest, read_message, write_message};
