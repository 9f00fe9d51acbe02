//! Scripted in-memory worker for integration tests.
//!
//! Understands a tiny subset of Python, one statement per line:
//! `print('text')`, `raise Name('message')`, `1 + 1`, and
//! `time.sleep(seconds)` (interruptible). Any submission containing the
//! variable-listing script answers with a fixed JSON namespace.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gantry_core::{
    CoreConfig, Error, KernelChannel, KernelSpec, KernelWorker, RawMessage, RequestId, Result,
    ShellRequest, WorkerLauncher,
};
use serde_json::{Value, json};
use tokio::sync::{Mutex, Notify, mpsc};

/// Config with short timeouts for tests.
pub fn test_config() -> CoreConfig {
    CoreConfig {
        max_kernels: 4,
        kernel_timeout: Duration::from_secs(2),
        query_timeout: Duration::from_secs(1),
        poll_timeout: Duration::from_millis(50),
        poll_backoff: Duration::from_millis(1),
        execution_history: 100,
        ..CoreConfig::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MockOptions {
    /// `wait_ready` never returns.
    pub never_ready: bool,
    /// `restart` fails.
    pub fail_restart: bool,
    /// The worker dies as soon as code is submitted.
    pub die_on_submit: bool,
}

#[derive(Debug, Default)]
pub struct MockStats {
    pub launched: AtomicUsize,
    pub interrupts: AtomicUsize,
    pub restarts: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub submissions: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct MockLauncher {
    options: MockOptions,
    pub stats: Arc<MockStats>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::with_options(MockOptions::default())
    }

    pub fn with_options(options: MockOptions) -> Self {
        Self {
            options,
            stats: Arc::new(MockStats::default()),
        }
    }
}

/// Spec whose workers never report ready, whatever the launcher options.
pub const SLOW_SPEC: &str = "slow";

impl WorkerLauncher for MockLauncher {
    fn spec(&self, name: &str) -> Option<KernelSpec> {
        match name {
            "python3" => Some(KernelSpec::python3()),
            SLOW_SPEC => Some(KernelSpec {
                name: SLOW_SPEC.to_string(),
                ..KernelSpec::python3()
            }),
            _ => None,
        }
    }

    fn launch(&self, spec: &KernelSpec) -> Result<Box<dyn KernelWorker>> {
        self.stats.launched.fetch_add(1, Ordering::SeqCst);
        let options = MockOptions {
            never_ready: self.options.never_ready || spec.name == SLOW_SPEC,
            ..self.options
        };
        Ok(Box::new(MockWorker {
            options,
            stats: Arc::clone(&self.stats),
            channel: Arc::new(MockChannel::new(options, Arc::clone(&self.stats))),
            started: false,
        }))
    }
}

/// Poll `condition` every 10ms for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub struct MockWorker {
    options: MockOptions,
    stats: Arc<MockStats>,
    channel: Arc<MockChannel>,
    started: bool,
}

#[async_trait]
impl KernelWorker for MockWorker {
    async fn start(&mut self) -> Result<()> {
        self.started = true;
        self.channel.dead.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_ready(&mut self, _timeout: Duration) -> Result<()> {
        if self.options.never_ready {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<()> {
        self.stats.interrupts.fetch_add(1, Ordering::SeqCst);
        self.channel.interrupt.notify_one();
        Ok(())
    }

    async fn restart(&mut self) -> Result<()> {
        self.stats.restarts.fetch_add(1, Ordering::SeqCst);
        if self.options.fail_restart {
            self.started = false;
            self.channel.dead.store(true, Ordering::SeqCst);
            return Err(Error::StartFailure("mock restart failed".to_string()));
        }
        self.channel.counter.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.started {
            self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
        self.started = false;
        self.channel.dead.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.started && !self.channel.dead.load(Ordering::SeqCst)
    }

    fn channel(&self) -> Arc<dyn KernelChannel> {
        self.channel.clone()
    }
}

pub struct MockChannel {
    options: MockOptions,
    stats: Arc<MockStats>,
    tx: mpsc::UnboundedSender<RawMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<RawMessage>>,
    interrupt: Arc<Notify>,
    dead: AtomicBool,
    counter: Arc<AtomicU64>,
}

impl MockChannel {
    fn new(options: MockOptions, stats: Arc<MockStats>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            options,
            stats,
            tx,
            rx: Mutex::new(rx),
            interrupt: Arc::new(Notify::new()),
            dead: AtomicBool::new(true),
            counter: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl KernelChannel for MockChannel {
    async fn submit_code(
        &self,
        code: &str,
        _silent: bool,
        _store_history: bool,
    ) -> Result<RequestId> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(Error::Channel("worker is not running".to_string()));
        }

        let request_id = RequestId::new();
        self.stats.submissions.fetch_add(1, Ordering::SeqCst);

        if self.options.die_on_submit {
            self.dead.store(true, Ordering::SeqCst);
            return Ok(request_id);
        }

        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let script = Script {
            code: code.to_string(),
            request_id: request_id.clone(),
            tx: self.tx.clone(),
            interrupt: Arc::clone(&self.interrupt),
            stats: Arc::clone(&self.stats),
            counter: Arc::clone(&self.counter),
        };
        tokio::spawn(script.run());

        Ok(request_id)
    }

    async fn receive_next_event(&self, timeout: Duration) -> Result<Option<RawMessage>> {
        let mut rx = self.rx.lock().await;
        if let Ok(msg) = rx.try_recv() {
            return Ok(Some(msg));
        }
        if self.dead.load(Ordering::SeqCst) {
            return Err(Error::Channel("worker died".to_string()));
        }
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(msg)) => Ok(Some(msg)),
            Ok(None) => Err(Error::Channel("event queue closed".to_string())),
            Err(_) => Ok(None),
        }
    }

    async fn request(&self, request: ShellRequest, _timeout: Duration) -> Result<Value> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(Error::Channel("worker is not running".to_string()));
        }
        Ok(match request {
            ShellRequest::KernelInfo => json!({ "status": "ok" }),
            ShellRequest::Complete { cursor_pos, .. } => json!({
                "status": "ok",
                "matches": ["print"],
                "cursor_start": 0,
                "cursor_end": cursor_pos,
            }),
            ShellRequest::Inspect { code, .. } => json!({
                "status": "ok",
                "found": true,
                "data": { "text/plain": format!("Docstring for {}", code) },
            }),
        })
    }
}

const NAMESPACE_REPLY: &str = r#"[{"name": "x", "type": "int", "shape": "", "preview": "1", "size": 28}, {"name": "_hidden", "type": "int"}, {"name": "Out", "type": "dict"}]"#;

struct Script {
    code: String,
    request_id: RequestId,
    tx: mpsc::UnboundedSender<RawMessage>,
    interrupt: Arc<Notify>,
    stats: Arc<MockStats>,
    counter: Arc<AtomicU64>,
}

impl Script {
    fn emit(&self, msg_type: &str, content: Value) {
        let _ = self.tx.send(RawMessage {
            parent_id: Some(self.request_id.clone()),
            msg_type: msg_type.to_string(),
            content,
        });
    }

    async fn run(self) {
        self.emit("status", json!({ "execution_state": "busy" }));
        self.emit("execute_input", json!({ "code": self.code }));

        // Output from some other request sharing the queue.
        let _ = self.tx.send(RawMessage {
            parent_id: Some(RequestId::new()),
            msg_type: "stream".to_string(),
            content: json!({ "name": "stdout", "text": "not mine\n" }),
        });

        let count = self.counter.fetch_add(1, Ordering::SeqCst) + 1;

        if self.code.contains("_gantry_var_info") {
            self.emit("stream", json!({ "name": "stdout", "text": format!("{}\n", NAMESPACE_REPLY) }));
        } else {
            self.run_lines(count).await;
        }

        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.emit("status", json!({ "execution_state": "idle" }));
    }

    async fn run_lines(&self, count: u64) {
        for line in self.code.lines().map(str::trim) {
            if let Some(seconds) = line
                .strip_prefix("time.sleep(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|s| s.parse::<f64>().ok())
            {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => {}
                    _ = self.interrupt.notified() => {
                        self.emit("error", json!({
                            "ename": "KeyboardInterrupt",
                            "evalue": "",
                            "traceback": ["KeyboardInterrupt"],
                        }));
                        return;
                    }
                }
            } else if line.starts_with("print(") {
                self.emit("stream", json!({ "name": "stdout", "text": format!("{}\n", quoted(line)) }));
            } else if let Some(rest) = line.strip_prefix("raise ") {
                let ename = rest.split('(').next().unwrap_or(rest);
                self.emit("error", json!({
                    "ename": ename,
                    "evalue": quoted(line),
                    "traceback": [format!("{}: {}", ename, quoted(line))],
                }));
                return;
            } else if line == "1 + 1" {
                self.emit("execute_result", json!({
                    "data": { "text/plain": "2" },
                    "metadata": {},
                    "execution_count": count,
                }));
            }
        }
    }
}

/// Text between the first and last quote of a line.
fn quoted(line: &str) -> &str {
    let Some(start) = line.find(['\'', '"']) else {
        return "";
    };
    let quote = line[start..].chars().next().unwrap_or('\'');
    match line.rfind(quote) {
        Some(end) if end > start => &line[start + 1..end],
        _ => "",
    }
}
