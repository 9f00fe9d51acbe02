//! Kernel records and the pool that owns them.
//!
//! A kernel is one live interpreter session running in its own worker
//! process. The [`KernelPool`] owns every worker and hands out
//! [`ExecutionChannel`](crate::channel::ExecutionChannel) wrappers on demand.
//!
//! # Lifecycle
//!
//! ```text
//! STARTING ──► IDLE ◄──► BUSY
//!               ▲          │
//!               │          ▼ restart()
//!               └──── RESTARTING
//! ```
//!
//! A dead kernel is removed from the pool rather than kept with a terminal
//! status.

mod pool;
mod spec;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::ids::KernelId;

pub use pool::{ExecutionSlot, KernelPool};
pub use spec::{KernelCreate, KernelSpec};

/// Status of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelStatus {
    /// Worker launched, waiting for it to report ready.
    Starting,
    /// Ready to accept a submission.
    Idle,
    /// An execution is in flight.
    Busy,
    /// Worker is being killed and respawned.
    Restarting,
}

/// A tracked kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    /// Unique kernel identifier.
    pub id: KernelId,
    /// Spec name the kernel was started from (e.g. `python3`).
    pub name: String,
    /// Current status.
    pub status: KernelStatus,
    /// Notebook that owns this kernel, if any.
    pub notebook_id: Option<String>,
    /// Number of completed executions since start or last restart.
    pub execution_count: u64,
    /// Creation time (Unix milliseconds).
    pub created_at: u64,
    /// Last status change or execution (Unix milliseconds).
    pub last_activity: u64,
}

impl Kernel {
    pub(crate) fn new(id: KernelId, name: String, notebook_id: Option<String>) -> Self {
        let now = now_millis();
        Self {
            id,
            name,
            status: KernelStatus::Starting,
            notebook_id,
            execution_count: 0,
            created_at: now,
            last_activity: now,
        }
    }
}

/// Current wall-clock time as Unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
