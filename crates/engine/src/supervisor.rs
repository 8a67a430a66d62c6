// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process supervisor: owns agent child lifetimes without ever blocking
//! the runner loop.
//!
//! Children run with piped stdio (no TTY) and no wall-clock or idle
//! timeout — agents are long-running by design. Each stream gets a reader
//! task that appends to the per-run log file, feeds a bounded per-child
//! output queue (drop-oldest on overflow), and maintains a 4 KiB ring of
//! recent output plus a tail-bounded combined buffer for the completion
//! record. A waiter task per child reaps the exit and enqueues a
//! [`ChildExit`] for the next [`ProcessSupervisor::poll`].

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use fuel_core::{truncate_output_tail, OUTPUT_TAIL_LIMIT};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Bytes of recent output retained per child for live snapshots.
pub const OUTPUT_RING_CAPACITY: usize = 4096;

/// Chunks buffered per child before the oldest is dropped.
const OUTPUT_QUEUE_CAPACITY: usize = 64;

/// Grace period between SIGTERM and SIGKILL for a single child.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Grace period for all children during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Additional wait for force-killed children to be reaped.
const SHUTDOWN_REAP: Duration = Duration::from_secs(15);

/// What a supervised child is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    Task,
    Review,
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessType::Task => write!(f, "task"),
            ProcessType::Review => write!(f, "review"),
        }
    }
}

/// Which stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn log_name(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout.log",
            OutputStream::Stderr => "stderr.log",
        }
    }
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// A chunk of child output, merged into the tick via [`ProcessSupervisor::poll_output`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutputChunk {
    pub task_key: String,
    pub run_id: String,
    pub stream: OutputStream,
    pub chunk: String,
}

/// In-memory record of one supervised child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveProcess {
    pub task_id: String,
    pub run_id: String,
    pub agent: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub process_type: ProcessType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A reaped child, returned once from [`ProcessSupervisor::poll`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChildExit {
    pub task_key: String,
    pub run_id: String,
    pub agent: String,
    pub process_type: ProcessType,
    /// `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    /// Combined stdout+stderr, tail-bounded.
    pub output: String,
}

/// Everything needed to start one agent child.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Supervisor key: the task short id, or `review-<task>` for reviews.
    pub task_key: String,
    pub agent: String,
    /// Program and arguments; must be non-empty.
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
    pub process_type: ProcessType,
    pub run_id: String,
}

/// Drop-oldest byte ring of recent output.
struct OutputRing {
    buf: VecDeque<u8>,
}

impl OutputRing {
    fn new() -> Self {
        Self {
            buf: VecDeque::with_capacity(OUTPUT_RING_CAPACITY),
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.buf.len() == OUTPUT_RING_CAPACITY {
                self.buf.pop_front();
            }
            self.buf.push_back(b);
        }
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&Vec::from_iter(self.buf.iter().copied())).into_owned()
    }
}

/// Shared per-child capture state written by the reader tasks.
struct Capture {
    ring: Mutex<OutputRing>,
    /// Combined tail for the completion record.
    tail: Mutex<String>,
    /// Bounded chunk queue drained by the tick; oldest dropped on overflow.
    queue: Mutex<VecDeque<OutputChunk>>,
}

impl Capture {
    fn new() -> Self {
        Self {
            ring: Mutex::new(OutputRing::new()),
            tail: Mutex::new(String::new()),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    fn record(&self, chunk: OutputChunk, bytes: &[u8]) {
        self.ring.lock().push(bytes);
        {
            let mut tail = self.tail.lock();
            tail.push_str(&chunk.chunk);
            if tail.len() > OUTPUT_TAIL_LIMIT {
                *tail = truncate_output_tail(&tail);
            }
        }
        {
            let mut queue = self.queue.lock();
            if queue.len() == OUTPUT_QUEUE_CAPACITY {
                queue.pop_front();
            }
            queue.push_back(chunk);
        }
    }
}

struct ChildEntry {
    process: ActiveProcess,
    capture: Arc<Capture>,
}

pub struct ProcessSupervisor {
    active: Arc<Mutex<HashMap<String, ChildEntry>>>,
    exits_tx: mpsc::UnboundedSender<ChildExit>,
    exits_rx: Mutex<mpsc::UnboundedReceiver<ChildExit>>,
    shutting_down: Arc<AtomicBool>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            exits_tx,
            exits_rx: Mutex::new(exits_rx),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install SIGINT/SIGTERM handlers that set the shutdown flag.
    ///
    /// Handlers only set the flag; all real work happens in the tick.
    pub fn register_signal_handlers(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        for kind in [SignalKind::interrupt(), SignalKind::terminate()] {
            let mut stream = signal(kind)?;
            let flag = Arc::clone(&self.shutting_down);
            tokio::spawn(async move {
                if stream.recv().await.is_some() {
                    flag.store(true, Ordering::SeqCst);
                }
            });
        }
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// True while the per-agent concurrency limit leaves a free slot.
    pub fn can_spawn(&self, agent: &str, concurrency_limit: u32) -> bool {
        (self.running_count_for_agent(agent) as u32) < concurrency_limit
    }

    pub fn running_count_for_agent(&self, agent: &str) -> usize {
        self.active
            .lock()
            .values()
            .filter(|entry| entry.process.agent == agent)
            .count()
    }

    pub fn is_running(&self, task_key: &str) -> bool {
        self.active.lock().contains_key(task_key)
    }

    /// Snapshot of all active processes, keyed by task key.
    pub fn active_processes(&self) -> HashMap<String, ActiveProcess> {
        self.active
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.process.clone()))
            .collect()
    }

    /// PIDs of every child this supervisor currently tracks.
    pub fn active_pids(&self) -> std::collections::HashSet<u32> {
        self.active
            .lock()
            .values()
            .map(|entry| entry.process.pid)
            .collect()
    }

    /// Recent output ring contents for one child, if it is still tracked.
    pub fn ring_contents(&self, task_key: &str) -> Option<String> {
        self.active
            .lock()
            .get(task_key)
            .map(|entry| entry.capture.ring.lock().contents())
    }

    /// Start a child and begin streaming its output.
    pub async fn spawn(
        &self,
        data_dir: &Path,
        req: SpawnRequest,
    ) -> Result<ActiveProcess, EngineError> {
        let Some((program, args)) = req.argv.split_first() else {
            return Err(EngineError::Spawn("empty command".into()));
        };
        if self.is_running(&req.task_key) {
            return Err(EngineError::Spawn(format!(
                "task {} already has a running process",
                req.task_key
            )));
        }

        let log_dir = data_dir.join("processes").join(&req.run_id);
        create_log_dir(&log_dir).map_err(|e| EngineError::Spawn(e.to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&req.cwd)
            .envs(req.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{program}: {e}")))?;

        let pid = child
            .id()
            .ok_or_else(|| EngineError::Spawn(format!("{program}: no pid")))?;

        let process = ActiveProcess {
            task_id: req.task_key.clone(),
            run_id: req.run_id.clone(),
            agent: req.agent.clone(),
            pid,
            started_at: Utc::now(),
            process_type: req.process_type,
            session_id: None,
        };

        let capture = Arc::new(Capture::new());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut readers = Vec::new();
        if let Some(stdout) = stdout {
            readers.push(tokio::spawn(stream_reader(
                stdout,
                OutputStream::Stdout,
                log_dir.clone(),
                req.task_key.clone(),
                req.run_id.clone(),
                Arc::clone(&capture),
            )));
        }
        if let Some(stderr) = stderr {
            readers.push(tokio::spawn(stream_reader(
                stderr,
                OutputStream::Stderr,
                log_dir.clone(),
                req.task_key.clone(),
                req.run_id.clone(),
                Arc::clone(&capture),
            )));
        }

        self.active.lock().insert(
            req.task_key.clone(),
            ChildEntry {
                process: process.clone(),
                capture: Arc::clone(&capture),
            },
        );

        // Waiter: reap the exit, let the readers drain, report once.
        let exits_tx = self.exits_tx.clone();
        let task_key = req.task_key.clone();
        let run_id = req.run_id.clone();
        let agent = req.agent.clone();
        let process_type = req.process_type;
        tokio::spawn(async move {
            let status = child.wait().await;
            for reader in readers {
                let _ = reader.await;
            }

            let exit_code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    error!(task = %task_key, error = %e, "failed to reap child");
                    None
                }
            };

            let output = capture.tail.lock().clone();
            let _ = exits_tx.send(ChildExit {
                task_key,
                run_id,
                agent,
                process_type,
                exit_code,
                output,
            });
        });

        debug!(task = %req.task_key, pid, agent = %req.agent, "spawned agent process");
        Ok(process)
    }

    /// Drain reaped children. Non-blocking; each exit is returned once and
    /// its tracking entry (ring included) is dropped.
    pub fn poll(&self) -> Vec<ChildExit> {
        let mut exits = Vec::new();
        {
            let mut rx = self.exits_rx.lock();
            while let Ok(exit) = rx.try_recv() {
                exits.push(exit);
            }
        }
        if !exits.is_empty() {
            let mut active = self.active.lock();
            for exit in &exits {
                active.remove(&exit.task_key);
            }
        }
        exits
    }

    /// Drain buffered output chunks from every child, oldest first.
    pub fn poll_output(&self) -> Vec<OutputChunk> {
        let mut chunks = Vec::new();
        let active = self.active.lock();
        for entry in active.values() {
            let mut queue = entry.capture.queue.lock();
            chunks.extend(queue.drain(..));
        }
        chunks
    }

    /// Gracefully terminate one child: SIGTERM, a 5-second grace period,
    /// then SIGKILL. The exit still arrives via [`ProcessSupervisor::poll`].
    pub async fn kill(&self, task_key: &str) {
        let pid = match self.active.lock().get(task_key) {
            Some(entry) => entry.process.pid,
            None => return,
        };

        kill_signal("-TERM", pid);
        if wait_for_death(pid, KILL_GRACE).await {
            return;
        }
        warn!(task = %task_key, pid, "child survived SIGTERM grace, force killing");
        kill_signal("-KILL", pid);
    }

    /// Terminate every child: graceful drain, force-kill survivors, then
    /// wait for reaps and clear tracking.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let pids: Vec<u32> = self
            .active
            .lock()
            .values()
            .map(|entry| entry.process.pid)
            .collect();
        if pids.is_empty() {
            return;
        }

        for &pid in &pids {
            kill_signal("-TERM", pid);
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        loop {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                for &pid in &pids {
                    if is_process_alive(pid) {
                        warn!(pid, "force killing child at shutdown deadline");
                        kill_signal("-KILL", pid);
                    }
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // Wait for waiter tasks to reap, then drop tracking.
        let reap_deadline = tokio::time::Instant::now() + SHUTDOWN_REAP;
        while tokio::time::Instant::now() < reap_deadline {
            self.poll();
            if self.active.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.active.lock().clear();
    }
}

/// Read one stream to EOF: append to the log file, mirror into capture.
async fn stream_reader(
    mut stream: impl tokio::io::AsyncRead + Unpin,
    which: OutputStream,
    log_dir: PathBuf,
    task_key: String,
    run_id: String,
    capture: Arc<Capture>,
) {
    let log_path = log_dir.join(which.log_name());
    let mut log_file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await
    {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %log_path.display(), error = %e, "failed to open process log");
            None
        }
    };

    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let bytes = &buf[..n];
                if let Some(file) = log_file.as_mut() {
                    if let Err(e) = file.write_all(bytes).await {
                        warn!(path = %log_path.display(), error = %e, "process log write failed");
                        log_file = None;
                    }
                }
                let chunk = OutputChunk {
                    task_key: task_key.clone(),
                    run_id: run_id.clone(),
                    stream: which,
                    chunk: String::from_utf8_lossy(bytes).into_owned(),
                };
                capture.record(chunk, bytes);
            }
            Err(e) => {
                debug!(task = %task_key, error = %e, "stream read ended");
                break;
            }
        }
    }
}

/// Create the per-run log directory with 0755 permissions.
fn create_log_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(dir)?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))
}

/// Check whether the OS still has a process with this pid.
pub fn is_process_alive(pid: u32) -> bool {
    kill_signal("-0", pid)
}

/// Deliver a signal via the `kill` binary.
fn kill_signal(signal: &str, pid: u32) -> bool {
    std::process::Command::new("kill")
        .args([signal, &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Poll until the pid is gone or the grace period ends.
async fn wait_for_death(pid: u32, grace: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !is_process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    !is_process_alive(pid)
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
