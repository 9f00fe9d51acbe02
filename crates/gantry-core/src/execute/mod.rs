//! Execution coordination.
//!
//! ```text
//! ExecuteRequest
//!     │
//!     └── ExecutionCoordinator::execute
//!             ├── KernelPool::acquire      (waits for the kernel, marks BUSY)
//!             ├── MagicPreprocessor        (immediate notices → first output)
//!             ├── ExecutionChannel::submit
//!             ├── ExecutionChannel::stream (each event → OutputSink + result)
//!             └── slot dropped             (kernel back to IDLE)
//! ```

mod coordinator;
mod result;

pub use coordinator::{ExecutionCoordinator, OutputSink};
pub use result::{ExecuteRequest, ExecutionError, ExecutionResult, ExecutionStatus};
