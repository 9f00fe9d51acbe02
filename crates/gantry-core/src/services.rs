//! Process-scoped service container.

use std::sync::Arc;

use crate::config::CoreConfig;
use crate::execute::ExecutionCoordinator;
use crate::ipc::ProcessLauncher;
use crate::kernel::KernelPool;
use crate::worker::WorkerLauncher;

/// The pool and coordinator, built once at startup and shared by reference.
#[derive(Clone)]
pub struct KernelServices {
    pub pool: Arc<KernelPool>,
    pub coordinator: Arc<ExecutionCoordinator>,
}

impl KernelServices {
    pub fn new(config: CoreConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        let pool = Arc::new(KernelPool::new(config, launcher));
        let coordinator = Arc::new(ExecutionCoordinator::new(Arc::clone(&pool)));
        Self { pool, coordinator }
    }

    /// Services backed by local worker processes.
    pub fn with_process_workers(config: CoreConfig) -> Self {
        let launcher = Arc::new(ProcessLauncher::new(config.working_dir.clone()));
        Self::new(config, launcher)
    }

    /// Shut down every kernel. Call once at process exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down {} kernel(s)", self.pool.len());
        self.pool.shutdown_all().await;
    }
}
