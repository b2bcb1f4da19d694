//! Worker pool management
//!
//! The pool owns the worker processes. Each worker is spawned with piped
//! stdio: commands go down stdin as JSON frames, `TaskMessage`s come back on
//! stdout and are forwarded into the scheduler's message queue, and stderr
//! (worker logs) is re-emitted through `tracing` so log records never
//! interleave with state messages.
//!
//! Submission is bounded by pool capacity plus a backlog; `try_submit`
//! refuses when both are exhausted and the scheduler leaves the task in
//! `Created` until the next tick. Temporary workers are spawned with a task
//! limit of 1 to break pool deadlocks and their handles are dropped as soon
//! as the process is seen dead.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use clusterd_config::SchedulerConfig;
use clusterd_ipc::{
    decode_line, encode_line, MessageEnvelope, TaskMessage, TaskPayload, WorkerCommand,
};

/// The pool cannot take the command right now
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("worker pool inbound backlog is full")]
    Full,
}

/// Worker process management failures
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(String),
}

/// Seam between the control loop and the pool implementation
pub trait WorkerPool: Send {
    /// Hand a command to an idle worker or queue it; `Err(Full)` defers the
    /// task to a later tick.
    fn try_submit(&mut self, command: WorkerCommand) -> Result<(), SubmitError>;

    fn persistent_worker_count(&self) -> usize;

    fn temp_worker_count(&self) -> usize;

    /// Spawn a one-shot worker bound to the same queues
    fn spawn_temp_worker(&mut self) -> Result<(), PoolError>;

    /// Forget dead temporary workers and replace dead persistent ones
    fn reap_workers(&mut self);

    /// SIGKILL every live worker; the pool is unusable afterwards
    fn shutdown(&mut self);
}

/// Process pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub worker_count: usize,
    /// Commands accepted beyond the number of idle workers
    pub max_backlog: usize,
    pub worker_binary: PathBuf,
    /// Recycle persistent workers after this many tasks
    pub worker_task_limit: Option<u32>,
}

impl PoolConfig {
    pub fn from_scheduler_config(config: &SchedulerConfig) -> Self {
        Self {
            worker_count: config.max_worker_count,
            max_backlog: config.max_worker_count,
            worker_binary: config
                .worker_binary
                .clone()
                .unwrap_or_else(default_worker_binary),
            worker_task_limit: config.worker_task_limit,
        }
    }
}

/// `clusterd-worker` installed next to the daemon binary, falling back to
/// PATH lookup.
fn default_worker_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("clusterd-worker")))
        .unwrap_or_else(|| PathBuf::from("clusterd-worker"))
}

fn worker_args(task_limit: Option<u32>) -> Vec<String> {
    match task_limit {
        Some(limit) => vec!["--task-limit".to_string(), limit.to_string()],
        None => Vec::new(),
    }
}

struct WorkerEntry {
    id: String,
    pid: u32,
    child: Option<Child>,
    stdin_tx: mpsc::UnboundedSender<WorkerCommand>,
    busy: bool,
    temporary: bool,
    /// Tasks left before the worker exits on its own; `Some(0)` means the
    /// worker is done and must not be handed more work.
    remaining: Option<u32>,
}

struct PoolShared {
    workers: Vec<WorkerEntry>,
    backlog: VecDeque<WorkerCommand>,
    max_backlog: usize,
    spawned: usize,
}

impl PoolShared {
    /// Try to place a command on an idle worker, handing it back on failure.
    fn dispatch(&mut self, command: WorkerCommand) -> Result<(), WorkerCommand> {
        let mut command = command;
        for worker in self.workers.iter_mut() {
            if worker.busy || worker.remaining == Some(0) {
                continue;
            }
            match worker.stdin_tx.send(command) {
                Ok(()) => {
                    worker.busy = true;
                    return Ok(());
                }
                Err(mpsc::error::SendError(returned)) => {
                    // Writer task is gone; the worker is dead or dying.
                    worker.remaining = Some(0);
                    command = returned;
                }
            }
        }
        Err(command)
    }

    /// Mark a worker idle after its terminal message and drain the backlog.
    fn task_completed(&mut self, worker_id: &str) {
        if let Some(worker) = self.workers.iter_mut().find(|w| w.id == worker_id) {
            worker.busy = false;
            if let Some(remaining) = worker.remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
            }
        }
        while let Some(command) = self.backlog.pop_front() {
            if let Err(returned) = self.dispatch(command) {
                self.backlog.push_front(returned);
                break;
            }
        }
    }
}

/// Pool of `clusterd-worker` processes
pub struct ProcessWorkerPool {
    config: PoolConfig,
    message_tx: mpsc::UnboundedSender<TaskMessage>,
    shared: Arc<Mutex<PoolShared>>,
}

impl ProcessWorkerPool {
    /// Spawn the persistent workers. Must run inside a Tokio runtime; the
    /// per-worker pipe tasks are spawned onto it.
    pub fn start(
        config: PoolConfig,
        message_tx: mpsc::UnboundedSender<TaskMessage>,
    ) -> Result<Self, PoolError> {
        let pool = Self {
            shared: Arc::new(Mutex::new(PoolShared {
                workers: Vec::new(),
                backlog: VecDeque::new(),
                max_backlog: config.max_backlog,
                spawned: 0,
            })),
            config,
            message_tx,
        };
        for _ in 0..pool.config.worker_count {
            pool.spawn_worker(false)?;
        }
        tracing::info!(
            worker_count = pool.config.worker_count,
            binary = %pool.config.worker_binary.display(),
            "worker pool started"
        );
        Ok(pool)
    }

    fn shared(&self) -> MutexGuard<'_, PoolShared> {
        lock(&self.shared)
    }

    fn spawn_worker(&self, temporary: bool) -> Result<(), PoolError> {
        let task_limit = if temporary {
            Some(1)
        } else {
            self.config.worker_task_limit
        };

        let mut child = Command::new(&self.config.worker_binary)
            .args(worker_args(task_limit))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| PoolError::Spawn("worker exited during spawn".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::Spawn("worker stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::Spawn("worker stdout not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PoolError::Spawn("worker stderr not piped".to_string()))?;

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();

        let mut shared = self.shared();
        let id = format!(
            "{}worker-{}",
            if temporary { "tmp-" } else { "" },
            shared.spawned
        );
        shared.spawned += 1;

        tokio::spawn(stdin_writer_task(id.clone(), stdin, stdin_rx));
        tokio::spawn(stdout_reader_task(
            id.clone(),
            stdout,
            self.message_tx.clone(),
            Arc::clone(&self.shared),
        ));
        tokio::spawn(stderr_reader_task(id.clone(), stderr));

        tracing::debug!(worker_id = %id, pid, temporary, "worker spawned");
        shared.workers.push(WorkerEntry {
            id,
            pid,
            child: Some(child),
            stdin_tx,
            busy: false,
            temporary,
            remaining: task_limit,
        });
        Ok(())
    }
}

impl WorkerPool for ProcessWorkerPool {
    fn try_submit(&mut self, command: WorkerCommand) -> Result<(), SubmitError> {
        let mut shared = self.shared();
        match shared.dispatch(command) {
            Ok(()) => Ok(()),
            Err(returned) => {
                if shared.backlog.len() < shared.max_backlog {
                    shared.backlog.push_back(returned);
                    Ok(())
                } else {
                    Err(SubmitError::Full)
                }
            }
        }
    }

    fn persistent_worker_count(&self) -> usize {
        self.shared().workers.iter().filter(|w| !w.temporary).count()
    }

    fn temp_worker_count(&self) -> usize {
        self.shared().workers.iter().filter(|w| w.temporary).count()
    }

    fn spawn_temp_worker(&mut self) -> Result<(), PoolError> {
        self.spawn_worker(true)
    }

    fn reap_workers(&mut self) {
        let mut respawn = 0;
        {
            let mut shared = self.shared();
            shared.workers.retain_mut(|worker| {
                let exited = worker
                    .child
                    .as_mut()
                    .and_then(|child| child.try_wait().ok())
                    .flatten()
                    .is_some();
                if !exited {
                    return true;
                }
                tracing::debug!(
                    worker_id = %worker.id,
                    pid = worker.pid,
                    temporary = worker.temporary,
                    "worker exited, closing handle"
                );
                if !worker.temporary {
                    respawn += 1;
                }
                false
            });
        }
        for _ in 0..respawn {
            if let Err(err) = self.spawn_worker(false) {
                tracing::error!(%err, "failed to respawn persistent worker");
            }
        }
    }

    fn shutdown(&mut self) {
        let mut shared = self.shared();
        for mut worker in shared.workers.drain(..) {
            if let Some(child) = worker.child.as_mut() {
                if let Err(err) = child.start_kill() {
                    tracing::debug!(worker_id = %worker.id, %err, "worker already gone");
                }
            }
        }
        shared.backlog.clear();
        tracing::info!("worker pool shut down");
    }
}

fn lock(shared: &Mutex<PoolShared>) -> MutexGuard<'_, PoolShared> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn stdin_writer_task(
    worker_id: String,
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<WorkerCommand>,
) {
    while let Some(command) = rx.recv().await {
        let frame = match encode_line(&MessageEnvelope::new(command)) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(worker_id = %worker_id, %err, "failed to encode command");
                continue;
            }
        };
        if let Err(err) = stdin.write_all(frame.as_bytes()).await {
            if err.kind() == std::io::ErrorKind::BrokenPipe {
                tracing::debug!(worker_id = %worker_id, "worker stdin closed");
            } else {
                tracing::error!(worker_id = %worker_id, %err, "failed to write to worker");
            }
            break;
        }
        if let Err(err) = stdin.flush().await {
            tracing::debug!(worker_id = %worker_id, %err, "worker stdin closed during flush");
            break;
        }
    }
}

async fn stdout_reader_task(
    worker_id: String,
    stdout: ChildStdout,
    message_tx: mpsc::UnboundedSender<TaskMessage>,
    shared: Arc<Mutex<PoolShared>>,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                tracing::debug!(worker_id = %worker_id, "worker stdout closed");
                break;
            }
            Ok(_) => match decode_line::<TaskMessage>(&line) {
                Ok(envelope) => {
                    let message = envelope.message;
                    if matches!(message.payload, TaskPayload::TaskFinished { .. }) {
                        lock(&shared).task_completed(&worker_id);
                    }
                    if message_tx.send(message).is_err() {
                        tracing::debug!(worker_id = %worker_id, "scheduler queue closed");
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(worker_id = %worker_id, %err, frame = %line.trim_end(), "unparseable worker frame");
                }
            },
            Err(err) => {
                tracing::error!(worker_id = %worker_id, %err, "failed to read worker stdout");
                break;
            }
        }
    }
}

/// Worker log lines arrive here; stdout is reserved for state messages.
async fn stderr_reader_task(worker_id: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "clusterd::worker", worker_id = %worker_id, "{}", line);
    }
}
