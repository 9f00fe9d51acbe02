//! Worker process management.
//!
//! Provides [`ProcessWorker`] for spawning and talking to an isolated worker
//! process, [`ProcessChannel`] for the framed duplex channel on its pipes,
//! and [`ProcessLauncher`] for turning kernel specs into workers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as TokioMutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::ids::RequestId;
use crate::kernel::KernelSpec;
use crate::worker::{KernelChannel, KernelWorker, RawMessage, ShellRequest, WorkerLauncher};

use super::protocol::{WireChannel, WireMessage, WireRequest, read_message, write_message};

/// Time a worker gets to exit after a shutdown request before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

type PendingReplies = Arc<Mutex<HashMap<RequestId, oneshot::Sender<WireMessage>>>>;

/// Live pipes to one worker process.
struct Connection {
    stdin: TokioMutex<BufWriter<ChildStdin>>,
    events: TokioMutex<mpsc::UnboundedReceiver<WireMessage>>,
    pending: PendingReplies,
    reader: JoinHandle<()>,
}

impl Connection {
    fn open(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending = PendingReplies::default();
        let reader = tokio::spawn(read_loop(stdout, events_tx, pending.clone()));

        Self {
            stdin: TokioMutex::new(BufWriter::new(stdin)),
            events: TokioMutex::new(events_rx),
            pending,
            reader,
        }
    }

    async fn send(&self, request: &WireRequest) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        write_message(&mut *stdin, request).await
    }

    fn register_reply(&self, msg_id: RequestId) -> Result<oneshot::Receiver<WireMessage>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| Error::Channel("reply table poisoned".to_string()))?
            .insert(msg_id, tx);
        Ok(rx)
    }

    fn forget_reply(&self, msg_id: &RequestId) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(msg_id);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Route frames from the worker's stdout until it closes.
async fn read_loop(
    stdout: ChildStdout,
    events: mpsc::UnboundedSender<WireMessage>,
    pending: PendingReplies,
) {
    let mut reader = BufReader::new(stdout);

    loop {
        match read_message::<_, WireMessage>(&mut reader).await {
            Ok(Some(msg)) => match msg.channel {
                WireChannel::Iopub => {
                    if events.send(msg).is_err() {
                        break;
                    }
                }
                WireChannel::Shell => {
                    let waiter = msg.parent_id.as_ref().and_then(|parent| {
                        pending.lock().ok().and_then(|mut map| map.remove(parent))
                    });
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(msg);
                        }
                        None => tracing::trace!("Dropping unsolicited {} reply", msg.msg_type),
                    }
                }
            },
            Ok(None) => {
                tracing::debug!("Worker closed its output stream");
                break;
            }
            Err(e) => {
                tracing::warn!("Worker stream failed: {}", e);
                break;
            }
        }
    }

    // Dropping the senders wakes every request still waiting for a reply.
    if let Ok(mut map) = pending.lock() {
        map.clear();
    }
}

/// Framed duplex channel to a worker process.
///
/// The same `ProcessChannel` survives restarts: the worker swaps the
/// underlying connection while callers keep their `Arc`.
#[derive(Default)]
pub struct ProcessChannel {
    connection: RwLock<Option<Arc<Connection>>>,
}

impl ProcessChannel {
    async fn attach(&self, connection: Connection) {
        *self.connection.write().await = Some(Arc::new(connection));
    }

    async fn detach(&self) -> Option<Arc<Connection>> {
        self.connection.write().await.take()
    }

    async fn connection(&self) -> Result<Arc<Connection>> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Channel("worker is not running".to_string()))
    }

    async fn send(&self, request: &WireRequest) -> Result<()> {
        self.connection().await?.send(request).await
    }

    /// Whether a connection is attached and still being read.
    ///
    /// A connection being swapped right now counts as open.
    fn is_open(&self) -> bool {
        self.connection.try_read().map_or(true, |connection| {
            connection
                .as_ref()
                .is_some_and(|connection| !connection.reader.is_finished())
        })
    }
}

#[async_trait]
impl KernelChannel for ProcessChannel {
    async fn submit_code(
        &self,
        code: &str,
        silent: bool,
        store_history: bool,
    ) -> Result<RequestId> {
        let request = WireRequest::new(
            "execute_request",
            json!({
                "code": code,
                "silent": silent,
                "store_history": store_history,
                "allow_stdin": false,
                "stop_on_error": true,
            }),
        );
        self.send(&request).await?;
        Ok(request.msg_id)
    }

    async fn receive_next_event(&self, timeout: Duration) -> Result<Option<RawMessage>> {
        let connection = self.connection().await?;
        let mut events = connection.events.lock().await;

        match tokio::time::timeout(timeout, events.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(msg)) => Ok(Some(msg.into())),
            Ok(None) => Err(Error::Channel("worker event stream closed".to_string())),
        }
    }

    async fn request(&self, request: ShellRequest, timeout: Duration) -> Result<Value> {
        let connection = self.connection().await?;
        let wire = WireRequest::new(request.msg_type(), request.content());
        let reply = connection.register_reply(wire.msg_id.clone())?;

        if let Err(e) = connection.send(&wire).await {
            connection.forget_reply(&wire.msg_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(msg)) => Ok(msg.content),
            Ok(Err(_)) => Err(Error::Channel(format!(
                "worker exited before answering {}",
                request.msg_type()
            ))),
            Err(_) => {
                connection.forget_reply(&wire.msg_id);
                Err(Error::Channel(format!(
                    "no reply to {} within {:?}",
                    request.msg_type(),
                    timeout
                )))
            }
        }
    }
}

/// Handle to a worker process.
pub struct ProcessWorker {
    spec: KernelSpec,
    program: PathBuf,
    working_dir: PathBuf,
    child: Option<Child>,
    channel: Arc<ProcessChannel>,
}

impl ProcessWorker {
    /// Create an unstarted worker that will run `program` with the spec's arguments.
    pub fn new(spec: KernelSpec, program: PathBuf, working_dir: PathBuf) -> Self {
        Self {
            spec,
            program,
            working_dir,
            child: None,
            channel: Arc::new(ProcessChannel::default()),
        }
    }

    /// Process ID of the running worker.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    async fn spawn(&mut self) -> Result<()> {
        tokio::fs::create_dir_all(&self.working_dir)
            .await
            .map_err(|e| {
                Error::StartFailure(format!(
                    "Failed to create working directory '{}': {}",
                    self.working_dir.display(),
                    e
                ))
            })?;

        let mut child = Command::new(&self.program)
            .args(self.spec.argv.iter().skip(1))
            .envs(&self.spec.env)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Let worker stderr pass through for debugging
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::StartFailure(format!(
                    "Failed to spawn worker process '{}': {}",
                    self.program.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::StartFailure("Failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::StartFailure("Failed to get worker stdout".to_string()))?;

        self.channel.attach(Connection::open(stdin, stdout)).await;
        tracing::info!(
            "Started {} worker (pid {})",
            self.spec.name,
            child.id().unwrap_or_default()
        );
        self.child = Some(child);

        Ok(())
    }

    #[cfg(unix)]
    async fn deliver_interrupt(&self, pid: u32) -> Result<()> {
        // SAFETY: kill(2) on a pid we spawned and have not reaped.
        let rc = unsafe { libc::kill(pid as i32, libc::SIGINT) };
        if rc != 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn deliver_interrupt(&self, _pid: u32) -> Result<()> {
        self.channel
            .send(&WireRequest::new("interrupt_request", json!({})))
            .await
    }

    /// Ask the worker to exit, then kill it if it does not within the grace period.
    async fn stop(&mut self) {
        let connection = self.channel.detach().await;
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Some(connection) = connection {
            let request = WireRequest::new("shutdown_request", json!({ "restart": false }));
            let _ = connection.send(&request).await;
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("Worker exited with {}", status),
            _ => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill worker: {}", e);
                }
            }
        }
    }
}

#[async_trait]
impl KernelWorker for ProcessWorker {
    async fn start(&mut self) -> Result<()> {
        if self.is_alive() {
            return Ok(());
        }
        self.spawn().await
    }

    async fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        self.channel
            .request(ShellRequest::KernelInfo, timeout)
            .await
            .map(|_| ())
            .map_err(|e| Error::StartFailure(format!("worker did not become ready: {}", e)))
    }

    async fn interrupt(&mut self) -> Result<()> {
        let pid = self
            .pid()
            .ok_or_else(|| Error::Channel("worker is not running".to_string()))?;

        self.deliver_interrupt(pid).await
    }

    async fn restart(&mut self) -> Result<()> {
        self.stop().await;
        self.spawn().await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.stop().await;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        let running = self
            .child
            .as_mut()
            .is_some_and(|c| matches!(c.try_wait(), Ok(None)));
        // A worker that closed its output can no longer answer.
        running && self.channel.is_open()
    }

    fn channel(&self) -> Arc<dyn KernelChannel> {
        self.channel.clone()
    }
}

/// Launches process-backed workers from a table of kernel specs.
pub struct ProcessLauncher {
    specs: HashMap<String, KernelSpec>,
    working_dir: PathBuf,
}

impl ProcessLauncher {
    /// Create a launcher with the default `python3` spec.
    ///
    /// `GANTRY_WORKER_PATH` overrides the program of the default spec.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let mut python = KernelSpec::python3();
        if let Ok(path) = std::env::var("GANTRY_WORKER_PATH") {
            python.argv[0] = path;
        }

        Self::empty(working_dir).with_spec(python)
    }

    /// Create a launcher with no specs.
    pub fn empty(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            specs: HashMap::new(),
            working_dir: working_dir.into(),
        }
    }

    /// Register (or replace) a spec.
    pub fn with_spec(mut self, spec: KernelSpec) -> Self {
        self.specs.insert(spec.name.clone(), spec);
        self
    }

    /// All registered specs, sorted by name.
    pub fn specs(&self) -> Vec<&KernelSpec> {
        let mut specs: Vec<_> = self.specs.values().collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Find the worker program for a spec.
    ///
    /// Looks in the following order:
    /// 1. `argv[0]` itself, if it names an existing path
    /// 2. Same directory as the current executable
    /// 3. System PATH
    fn resolve_program(spec: &KernelSpec) -> Result<PathBuf> {
        let program = spec
            .argv
            .first()
            .ok_or_else(|| Error::StartFailure(format!("kernel spec '{}' has no command", spec.name)))?;

        let direct = Path::new(program);
        if direct.components().count() > 1 && direct.exists() {
            return Ok(direct.to_path_buf());
        }

        if let Ok(exe_path) = std::env::current_exe()
            && let Some(exe_dir) = exe_path.parent()
        {
            let candidate = exe_dir.join(program);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        which::which(program).map_err(|_| {
            Error::StartFailure(format!(
                "Could not find worker program '{}' for kernel '{}'. Install it or put it on PATH.",
                program, spec.name
            ))
        })
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn spec(&self, name: &str) -> Option<KernelSpec> {
        self.specs.get(name).cloned()
    }

    fn launch(&self, spec: &KernelSpec) -> Result<Box<dyn KernelWorker>> {
        let program = Self::resolve_program(spec)?;
        Ok(Box::new(ProcessWorker::new(
            spec.clone(),
            program,
            self.working_dir.clone(),
        )))
    }
}
