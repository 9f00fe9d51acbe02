//! Bounded pool of live kernels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use indexmap::IndexMap;
use tokio::sync::{Notify, OwnedMutexGuard};

use super::{Kernel, KernelCreate, KernelStatus, now_millis};
use crate::channel::{ChannelTimeouts, ExecutionChannel, NamespaceInspector, inspector_for};
use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::ids::KernelId;
use crate::worker::{KernelChannel, KernelWorker, WorkerLauncher};

/// Monotonic activity clock shared by the pool and its execution slots.
///
/// Wall-clock milliseconds collide when kernels are touched in quick
/// succession, so LRU order uses this counter instead.
#[derive(Debug, Default)]
struct ActivityClock(AtomicU64);

impl ActivityClock {
    fn tick(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Everything the pool owns for one kernel.
struct KernelEntry {
    record: Mutex<Kernel>,
    activity: AtomicU64,
    worker: tokio::sync::Mutex<Box<dyn KernelWorker>>,
    channel: Arc<dyn KernelChannel>,
    inspector: Option<Arc<dyn NamespaceInspector>>,
    exec_lock: Arc<tokio::sync::Mutex<()>>,
}

impl KernelEntry {
    fn snapshot(&self) -> Kernel {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the worker has exited. A worker locked by a start, interrupt
    /// or restart is in use, not dead.
    fn is_dead(&self) -> bool {
        self.worker
            .try_lock()
            .is_ok_and(|mut worker| !worker.is_alive())
    }

    /// Mutate the record and mark the kernel as just active.
    fn touch<R>(&self, clock: &ActivityClock, f: impl FnOnce(&mut Kernel) -> R) -> R {
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut record);
        record.last_activity = now_millis();
        self.activity.store(clock.tick(), Ordering::Relaxed);
        out
    }
}

/// Owns every kernel worker and its record.
///
/// Structural changes (reserving room, evict, shutdown) are serialized by one
/// async lock so two concurrent creates can never both evict or overshoot
/// `max_kernels`. Status updates only touch the entry's own record. A kernel
/// whose worker died is removed the next time it is looked up.
pub struct KernelPool {
    config: CoreConfig,
    launcher: Arc<dyn WorkerLauncher>,
    entries: RwLock<IndexMap<KernelId, Arc<KernelEntry>>>,
    structure: tokio::sync::Mutex<()>,
    /// Signalled when a start or restart finishes.
    settled: Notify,
    clock: Arc<ActivityClock>,
}

impl KernelPool {
    pub fn new(config: CoreConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            config,
            launcher,
            entries: RwLock::new(IndexMap::new()),
            structure: tokio::sync::Mutex::new(()),
            settled: Notify::new(),
            clock: Arc::new(ActivityClock::default()),
        }
    }

    /// Pool configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Number of tracked kernels.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start a kernel and wait until it is ready.
    ///
    /// Dead kernels are pruned first; if the pool is still full, the least
    /// recently active kernel is shut down to make room. The new kernel is
    /// listed as `Starting` while its worker comes up, and the structure lock
    /// is not held during that wait. A launch failure or readiness timeout
    /// leaves no record behind.
    pub async fn create(&self, request: KernelCreate) -> Result<Kernel> {
        let spec = self
            .launcher
            .spec(&request.name)
            .ok_or_else(|| Error::StartFailure(format!("unknown kernel spec '{}'", request.name)))?;

        let id = KernelId::new();
        let worker = self.launcher.launch(&spec)?;
        let entry = Arc::new(KernelEntry {
            record: Mutex::new(Kernel::new(id.clone(), spec.name.clone(), request.notebook_id)),
            activity: AtomicU64::new(0),
            channel: worker.channel(),
            worker: tokio::sync::Mutex::new(worker),
            inspector: inspector_for(&spec.language),
            exec_lock: Arc::new(tokio::sync::Mutex::new(())),
        });

        // Held until the worker is ready so nobody submits to it early.
        let mut worker = entry.worker.lock().await;
        let mut pending = self.reserve(&id, &entry).await;
        tracing::info!("Starting kernel {} ({})", id, spec.name);

        if let Err(e) = self.bring_up(&mut **worker).await {
            pending.discard();
            if let Err(teardown) = worker.shutdown().await {
                tracing::warn!("Failed to tear down kernel {} after start failure: {}", id, teardown);
            }
            return Err(e);
        }

        let record = {
            let entries = self.write_entries();
            entries.contains_key(&id).then(|| {
                entry.touch(&self.clock, |record| {
                    record.status = KernelStatus::Idle;
                    record.clone()
                })
            })
        };

        match record {
            Some(record) => {
                pending.commit();
                tracing::info!("Kernel {} ready", id);
                Ok(record)
            }
            None => {
                if let Err(e) = worker.shutdown().await {
                    tracing::warn!("Failed to tear down kernel {}: {}", id, e);
                }
                Err(Error::StartFailure(format!(
                    "kernel {} was shut down while starting",
                    id
                )))
            }
        }
    }

    /// Make room for `entry` and insert it as `Starting`.
    ///
    /// Kernels that are starting or restarting are never evicted. When they
    /// fill the pool, wait for one of them to settle and try again.
    async fn reserve(&self, id: &KernelId, entry: &Arc<KernelEntry>) -> PendingStart<'_> {
        loop {
            let settled = self.settled.notified();
            let structure = self.structure.lock().await;

            self.prune_dead_locked().await;
            while self.len() >= self.capacity() && self.evict_lru_locked().await {}

            if self.len() < self.capacity() {
                entry.activity.store(self.clock.tick(), Ordering::Relaxed);
                self.write_entries().insert(id.clone(), Arc::clone(entry));
                drop(structure);
                return PendingStart {
                    pool: self,
                    id: id.clone(),
                    committed: false,
                };
            }

            drop(structure);
            tracing::debug!("Pool is full of kernels in transition; {} waits", id);
            settled.await;
        }
    }

    /// Snapshot of one kernel.
    pub fn get(&self, id: &KernelId) -> Result<Kernel> {
        Ok(self.live_entry(id)?.snapshot())
    }

    /// Snapshots of all live kernels, in creation order.
    pub fn list(&self) -> Vec<Kernel> {
        let dead: Vec<KernelId> = self
            .read_entries()
            .iter()
            .filter(|(_, entry)| entry.is_dead())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dead {
            self.discard_dead(id);
        }

        self.read_entries()
            .values()
            .map(|entry| entry.snapshot())
            .collect()
    }

    /// Set a kernel's status. Unknown ids are ignored.
    pub fn update_status(&self, id: &KernelId, status: KernelStatus) {
        if let Ok(entry) = self.entry(id) {
            entry.touch(&self.clock, |record| record.status = status);
        }
    }

    /// Ask the kernel to stop its current work and mark it idle.
    pub async fn interrupt(&self, id: &KernelId) -> Result<()> {
        let entry = self.live_entry(id)?;
        tracing::debug!("Interrupting kernel {}", id);

        entry.worker.lock().await.interrupt().await?;
        entry.touch(&self.clock, |record| record.status = KernelStatus::Idle);
        Ok(())
    }

    /// Kill and respawn the kernel's worker, keeping its id and channel.
    ///
    /// Resets the execution counter. If the worker does not come back within
    /// `kernel_timeout` the kernel is removed and `StartFailure` returned.
    pub async fn restart(&self, id: &KernelId) -> Result<Kernel> {
        let entry = self.live_entry(id)?;
        tracing::info!("Restarting kernel {}", id);
        entry.touch(&self.clock, |record| record.status = KernelStatus::Restarting);

        let outcome = {
            let mut worker = entry.worker.lock().await;
            match worker.restart().await {
                Ok(()) => self.wait_ready(&mut **worker).await,
                Err(e) => Err(as_start_failure(e)),
            }
        };

        let restarted = match outcome {
            Ok(()) => Ok(entry.touch(&self.clock, |record| {
                record.status = KernelStatus::Idle;
                record.execution_count = 0;
                record.clone()
            })),
            Err(e) => {
                tracing::warn!("Kernel {} did not come back after restart: {}", id, e);
                self.shutdown(id).await;
                Err(e)
            }
        };
        self.settled.notify_waiters();
        restarted
    }

    /// Tear down a kernel and forget it. Unknown ids are a no-op.
    pub async fn shutdown(&self, id: &KernelId) {
        let _structure = self.structure.lock().await;
        self.shutdown_locked(id).await;
    }

    /// Shut down every tracked kernel.
    pub async fn shutdown_all(&self) {
        let _structure = self.structure.lock().await;
        let ids: Vec<KernelId> = self.read_entries().keys().cloned().collect();
        for id in ids {
            self.shutdown_locked(&id).await;
        }
    }

    /// Remove kernels whose worker is no longer running.
    pub async fn prune_dead(&self) -> Vec<KernelId> {
        let _structure = self.structure.lock().await;
        self.prune_dead_locked().await
    }

    /// Remove one kernel if its worker is no longer running.
    pub async fn remove_if_dead(&self, id: &KernelId) -> bool {
        let _structure = self.structure.lock().await;
        match self.entry(id) {
            Ok(entry) if entry.is_dead() => {
                tracing::info!("Removing dead kernel {}", id);
                self.shutdown_locked(id).await;
                true
            }
            _ => false,
        }
    }

    /// Execution channel for a kernel.
    pub fn channel(&self, id: &KernelId) -> Result<ExecutionChannel> {
        let entry = self.live_entry(id)?;
        Ok(self.channel_for(id, &entry))
    }

    /// Wait for exclusive use of a kernel and mark it busy.
    ///
    /// Waits out a start or restart in progress. The kernel returns to idle
    /// when the slot is dropped.
    pub async fn acquire(&self, id: &KernelId) -> Result<ExecutionSlot> {
        let entry = self.live_entry(id)?;
        drop(entry.worker.lock().await);
        let guard = Arc::clone(&entry.exec_lock).lock_owned().await;

        // Shut down while we were queued.
        if !self.read_entries().contains_key(id) {
            return Err(Error::KernelNotFound(id.clone()));
        }

        entry.touch(&self.clock, |record| record.status = KernelStatus::Busy);

        Ok(ExecutionSlot {
            kernel_id: id.clone(),
            channel: self.channel_for(id, &entry),
            entry,
            clock: Arc::clone(&self.clock),
            _guard: guard,
        })
    }

    fn entry(&self, id: &KernelId) -> Result<Arc<KernelEntry>> {
        self.read_entries()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::KernelNotFound(id.clone()))
    }

    /// Like [`entry`](Self::entry), but a kernel whose worker died is
    /// removed and reported as not found.
    fn live_entry(&self, id: &KernelId) -> Result<Arc<KernelEntry>> {
        let entry = self.entry(id)?;
        if entry.is_dead() {
            self.discard_dead(id);
            return Err(Error::KernelNotFound(id.clone()));
        }
        Ok(entry)
    }

    /// Forget a dead kernel without waiting for its teardown.
    fn discard_dead(&self, id: &KernelId) {
        let Some(entry) = self.write_entries().shift_remove(id) else {
            return;
        };
        tracing::info!("Removing dead kernel {}", id);

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let id = id.clone();
            runtime.spawn(async move {
                if let Err(e) = entry.worker.lock().await.shutdown().await {
                    tracing::warn!("Failed to reap dead kernel {}: {}", id, e);
                }
            });
        }
    }

    fn capacity(&self) -> usize {
        self.config.max_kernels.max(1)
    }

    fn channel_for(&self, id: &KernelId, entry: &KernelEntry) -> ExecutionChannel {
        ExecutionChannel::new(
            id.clone(),
            Arc::clone(&entry.channel),
            entry.inspector.clone(),
            ChannelTimeouts::from(&self.config),
        )
    }

    async fn bring_up(&self, worker: &mut dyn KernelWorker) -> Result<()> {
        worker.start().await.map_err(as_start_failure)?;
        self.wait_ready(worker).await
    }

    async fn wait_ready(&self, worker: &mut dyn KernelWorker) -> Result<()> {
        let timeout = self.config.kernel_timeout;
        match tokio::time::timeout(timeout, worker.wait_ready(timeout)).await {
            Ok(result) => result.map_err(as_start_failure),
            Err(_) => Err(Error::StartFailure(format!(
                "kernel did not become ready within {:?}",
                timeout
            ))),
        }
    }

    async fn evict_lru_locked(&self) -> bool {
        let victim = self
            .read_entries()
            .iter()
            .filter(|(_, entry)| {
                !matches!(
                    entry.snapshot().status,
                    KernelStatus::Starting | KernelStatus::Restarting
                )
            })
            .min_by_key(|(_, entry)| entry.activity.load(Ordering::Relaxed))
            .map(|(id, _)| id.clone());

        match victim {
            Some(id) => {
                tracing::info!(
                    "Evicting least recently active kernel {} (capacity {})",
                    id,
                    self.capacity()
                );
                self.shutdown_locked(&id).await;
                true
            }
            None => false,
        }
    }

    async fn prune_dead_locked(&self) -> Vec<KernelId> {
        let entries: Vec<(KernelId, Arc<KernelEntry>)> = self
            .read_entries()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();

        let mut dead = Vec::new();
        for (id, entry) in entries {
            if entry.is_dead() {
                tracing::info!("Removing dead kernel {}", id);
                self.shutdown_locked(&id).await;
                dead.push(id);
            }
        }
        dead
    }

    async fn shutdown_locked(&self, id: &KernelId) {
        let Some(entry) = self.write_entries().shift_remove(id) else {
            return;
        };

        // The creating task owns the worker until it is ready.
        if entry.snapshot().status == KernelStatus::Starting {
            tracing::info!("Kernel {} removed while starting", id);
            return;
        }

        tracing::info!("Shutting down kernel {}", id);
        if let Err(e) = entry.worker.lock().await.shutdown().await {
            tracing::warn!("Failed to shut down kernel {} cleanly: {}", id, e);
        }
        self.settled.notify_waiters();
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<KernelId, Arc<KernelEntry>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<KernelId, Arc<KernelEntry>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A `Starting` record inserted by [`KernelPool::reserve`].
///
/// Dropped without [`commit`](Self::commit) (start failed or the create
/// future was cancelled), the record is removed. Either way, tasks waiting
/// for room are woken.
struct PendingStart<'a> {
    pool: &'a KernelPool,
    id: KernelId,
    committed: bool,
}

impl PendingStart<'_> {
    fn commit(&mut self) {
        self.committed = true;
    }

    fn discard(&self) {
        self.pool.write_entries().shift_remove(&self.id);
    }
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.discard();
        }
        self.pool.settled.notify_waiters();
    }
}

fn as_start_failure(err: Error) -> Error {
    match err {
        Error::StartFailure(_) => err,
        other => Error::StartFailure(other.to_string()),
    }
}

/// Exclusive use of one kernel for the duration of an execution.
///
/// Holding a slot keeps the kernel BUSY; dropping it (normally, on error, or
/// when the owning future is cancelled) returns the kernel to IDLE.
pub struct ExecutionSlot {
    kernel_id: KernelId,
    channel: ExecutionChannel,
    entry: Arc<KernelEntry>,
    clock: Arc<ActivityClock>,
    _guard: OwnedMutexGuard<()>,
}

impl ExecutionSlot {
    pub fn kernel_id(&self) -> &KernelId {
        &self.kernel_id
    }

    /// Channel to the kernel held by this slot.
    pub fn channel(&self) -> &ExecutionChannel {
        &self.channel
    }

    /// Current execution counter.
    pub fn execution_count(&self) -> u64 {
        self.entry.snapshot().execution_count
    }

    /// Count one finished execution and return the new counter value.
    pub fn record_execution(&self) -> u64 {
        self.entry.touch(&self.clock, |record| {
            record.execution_count += 1;
            record.execution_count
        })
    }
}

impl Drop for ExecutionSlot {
    fn drop(&mut self) {
        // A restart that started mid-execution owns the status now.
        self.entry.touch(&self.clock, |record| {
            if record.status == KernelStatus::Busy {
                record.status = KernelStatus::Idle;
            }
        });
    }
}
