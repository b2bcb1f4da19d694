//! Scheduler facade and control loop
//!
//! All mutation funnels through `perform_actions`, the single coordination
//! tick. HTTP handlers and the daemon's periodic timer call it; one tick
//! drains every message already in the queue, dispatches created tasks,
//! garbage-collects, mitigates pool deadlocks and resumes paused workers,
//! in that order. Between ticks only worker processes make progress.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{mpsc, Mutex};

use clusterd_config::SchedulerConfig;
use clusterd_ipc::{AuthUser, CommandDto, TaskKillReason, TaskMessage, TaskPayload};
use clusterd_worker::CommandRegistry;

use crate::clock::{Clock, SystemClock};
use crate::error::SchedulerError;
use crate::ident::{TaskIdentSource, UuidIdentSource};
use crate::permissions::{GroupPermissionsChecker, PermissionsChecker, TaskPermission};
use crate::pool::{PoolConfig, PoolError, ProcessWorkerPool, SubmitError, WorkerPool};
use crate::signal::{NixSignaller, ProcessSignaller};
use crate::task::{Task, TaskInfo, TaskState};

/// Number of tasks per lifecycle state, for diagnostics and metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStateCounts {
    pub created: usize,
    pub queued: usize,
    pub executed: usize,
    pub finished: usize,
}

/// Injectable collaborators of the scheduler
///
/// Production uses the defaults; tests substitute a settable clock, a
/// deterministic ident source and a recording signaller.
pub struct SchedulerEnv {
    pub clock: Arc<dyn Clock>,
    pub signaller: Arc<dyn ProcessSignaller>,
    pub idents: Arc<dyn TaskIdentSource>,
    pub permissions: Arc<dyn PermissionsChecker>,
}

impl Default for SchedulerEnv {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            signaller: Arc::new(NixSignaller),
            idents: Arc::new(UuidIdentSource),
            permissions: Arc::new(GroupPermissionsChecker::default()),
        }
    }
}

/// State owned by the control loop
struct Inner {
    register: HashMap<String, Task>,
    messages: mpsc::UnboundedReceiver<TaskMessage>,
    pool: Box<dyn WorkerPool>,
    /// Last time any worker message arrived; drives deadlock inference
    last_message_at: DateTime<Utc>,
    next_sequence: u64,
}

/// The asynchronous task scheduler
pub struct Scheduler {
    inner: Mutex<Inner>,
    config: SchedulerConfig,
    commands: Arc<CommandRegistry>,
    clock: Arc<dyn Clock>,
    signaller: Arc<dyn ProcessSignaller>,
    idents: Arc<dyn TaskIdentSource>,
    permissions: Arc<dyn PermissionsChecker>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        pool: Box<dyn WorkerPool>,
        messages: mpsc::UnboundedReceiver<TaskMessage>,
        commands: Arc<CommandRegistry>,
        env: SchedulerEnv,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                register: HashMap::new(),
                messages,
                pool,
                last_message_at: env.clock.now(),
                next_sequence: 0,
            }),
            config,
            commands,
            clock: env.clock,
            signaller: env.signaller,
            idents: env.idents,
            permissions: env.permissions,
        }
    }

    /// Scheduler backed by a freshly started process pool and the default
    /// environment. Must be called inside a Tokio runtime.
    pub fn with_process_pool(
        config: SchedulerConfig,
        commands: Arc<CommandRegistry>,
    ) -> Result<Self, PoolError> {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let pool = ProcessWorkerPool::start(PoolConfig::from_scheduler_config(&config), message_tx)?;
        Ok(Self::new(
            config,
            Box::new(pool),
            message_rx,
            commands,
            SchedulerEnv::default(),
        ))
    }

    /// Register a new task. The command is only checked against the
    /// registry here; dispatch happens on the next tick.
    pub async fn new_task(
        &self,
        command: CommandDto,
        auth_user: AuthUser,
    ) -> Result<String, SchedulerError> {
        if !self.commands.contains(&command.name) {
            return Err(SchedulerError::CommandNotRegistered(command.name));
        }

        let mut inner = self.inner.lock().await;
        let ident = self.idents.next_ident();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        tracing::info!(task_ident = %ident, command = %command.name, user = %auth_user.username, "task created");
        let task = Task::new(ident.clone(), command, auth_user, sequence, self.clock.now());
        inner.register.insert(ident.clone(), task);
        Ok(ident)
    }

    /// Snapshot a task. The first call on a finished task arms its removal
    /// after `delete_after_terminal`.
    pub async fn get_task(
        &self,
        task_ident: &str,
        auth_user: &AuthUser,
    ) -> Result<TaskInfo, SchedulerError> {
        let mut inner = self.inner.lock().await;
        let task = inner
            .register
            .get_mut(task_ident)
            .ok_or_else(|| SchedulerError::TaskNotFound(task_ident.to_string()))?;
        authorize(&*self.permissions, auth_user, task, TaskPermission::View)?;

        task.observe_terminal(self.clock.now(), self.config.delete_after_terminal);
        Ok(task.to_info())
    }

    /// Request that a task be killed. Idempotent; the SIGKILL itself is
    /// deferred to the control loop until a worker pid exists. Killing an
    /// already finished task records the reason but cannot undo its result.
    pub async fn kill_task(
        &self,
        task_ident: &str,
        auth_user: &AuthUser,
    ) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        let task = inner
            .register
            .get_mut(task_ident)
            .ok_or_else(|| SchedulerError::TaskNotFound(task_ident.to_string()))?;
        authorize(&*self.permissions, auth_user, task, TaskPermission::Kill)?;

        tracing::info!(task_ident = %task_ident, user = %auth_user.username, "task kill requested");
        task.request_kill();
        Ok(())
    }

    /// Suspend until the task finishes, then behave like `get_task`.
    ///
    /// Honors the submission's `request_timeout`; on elapse the task keeps
    /// running and the caller gets [`SchedulerError::WaitTimeout`].
    pub async fn wait_for_task(
        &self,
        task_ident: &str,
        auth_user: &AuthUser,
    ) -> Result<TaskInfo, SchedulerError> {
        let (mut state_rx, request_timeout) = {
            let mut inner = self.inner.lock().await;
            let task = inner
                .register
                .get_mut(task_ident)
                .ok_or_else(|| SchedulerError::TaskNotFound(task_ident.to_string()))?;
            authorize(&*self.permissions, auth_user, task, TaskPermission::View)?;

            if task.state() == TaskState::Finished {
                task.observe_terminal(self.clock.now(), self.config.delete_after_terminal);
                return Ok(task.to_info());
            }
            (task.subscribe(), task.request_timeout())
        };

        let finished = state_rx.wait_for(|state| *state == TaskState::Finished);
        let outcome = match request_timeout {
            Some(seconds) => {
                tokio::time::timeout(std::time::Duration::from_secs(seconds), finished)
                    .await
                    .map_err(|_| SchedulerError::WaitTimeout(task_ident.to_string()))?
            }
            None => finished.await,
        };
        // A closed channel means GC removed the task while we waited.
        outcome
            .map(|_| ())
            .map_err(|_| SchedulerError::TaskNotFound(task_ident.to_string()))?;

        self.get_task(task_ident, auth_user).await
    }

    /// One coordination tick; idempotent when there is nothing to do.
    pub async fn perform_actions(&self) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = self.clock.now();

        let to_resume = self.receive_messages(inner, now);
        self.schedule_new_tasks(inner);
        self.garbage_collect(inner, now);
        self.manage_workers(inner, now);

        // Workers pause themselves after their terminal message; now that it
        // is processed they may return to the pool.
        for pid in to_resume {
            self.signaller.resume(pid);
        }
    }

    /// Current per-state task counts
    pub async fn state_counts(&self) -> TaskStateCounts {
        let inner = self.inner.lock().await;
        let mut counts = TaskStateCounts::default();
        for task in inner.register.values() {
            match task.state() {
                TaskState::Created => counts.created += 1,
                TaskState::Queued => counts.queued += 1,
                TaskState::Executed => counts.executed += 1,
                TaskState::Finished => counts.finished += 1,
            }
        }
        counts
    }

    /// Kill every live worker process. Called once at daemon shutdown.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.pool.shutdown();
        tracing::info!("scheduler shut down");
    }

    /// Step 1: drain every message already in the queue, non-blockingly.
    /// Returns pids of workers whose terminal message was processed.
    fn receive_messages(&self, inner: &mut Inner, now: DateTime<Utc>) -> Vec<u32> {
        let mut to_resume = Vec::new();
        while let Ok(message) = inner.messages.try_recv() {
            inner.last_message_at = now;
            let TaskMessage {
                task_ident,
                payload,
            } = message;

            let Some(task) = inner.register.get_mut(&task_ident) else {
                tracing::error!(task_ident = %task_ident, "message for unknown task discarded");
                continue;
            };

            match payload {
                TaskPayload::TaskExecuted { worker_pid } => {
                    if let Err(err) = task.apply_executed(worker_pid, now) {
                        tracing::error!(task_ident = %task_ident, %err, "TaskExecuted discarded");
                        task.force_finish(TaskKillReason::InternalMessagingError);
                    }
                }
                TaskPayload::TaskFinished {
                    finish_type,
                    result,
                } => match task.apply_finished(finish_type, result, now) {
                    Ok(Some(pid)) => to_resume.push(pid),
                    Ok(None) => {}
                    Err(err) => {
                        tracing::error!(task_ident = %task_ident, %err, "TaskFinished discarded");
                        task.force_finish(TaskKillReason::InternalMessagingError);
                    }
                },
                TaskPayload::TaskReport { report } => {
                    task.push_report(report, now);
                }
            }
        }
        to_resume
    }

    /// Step 2: submit created tasks in submission order. Tasks killed
    /// before dispatch finish here; a full pool defers the rest.
    fn schedule_new_tasks(&self, inner: &mut Inner) {
        let mut created: Vec<(u64, String)> = inner
            .register
            .values()
            .filter(|task| task.state() == TaskState::Created)
            .map(|task| (task.sequence(), task.ident().to_string()))
            .collect();
        created.sort_unstable();

        let Inner { register, pool, .. } = inner;
        for (_, ident) in created {
            let Some(task) = register.get_mut(&ident) else {
                continue;
            };
            if task.kill_requested() {
                tracing::info!(task_ident = %ident, "task killed before dispatch");
                task.force_finish(TaskKillReason::User);
                continue;
            }
            match pool.try_submit(task.to_worker_command()) {
                Ok(()) => task.mark_queued(),
                Err(SubmitError::Full) => {
                    tracing::debug!(task_ident = %ident, "pool backlog full, task stays created");
                    break;
                }
            }
        }
    }

    /// Step 3: garbage collection. Per task, in order: remove observed
    /// terminal tasks past their grace period; remove abandoned tasks
    /// nobody collected; kill pending-kill and defunct executing tasks.
    fn garbage_collect(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let mut remove = Vec::new();
        for (ident, task) in inner.register.iter_mut() {
            if let Some(deadline) = task.to_delete_at() {
                if now >= deadline {
                    remove.push(ident.clone());
                }
                continue;
            }

            if task.is_abandoned(now, self.config.task_abandoned_timeout) {
                if task.state() == TaskState::Executed {
                    if let Some(pid) = task.worker_pid() {
                        self.signaller.kill(pid);
                    }
                }
                tracing::warn!(task_ident = %ident, state = ?task.state(), "abandoned task removed");
                remove.push(ident.clone());
                continue;
            }

            if task.state() == TaskState::Executed {
                if task.kill_requested() {
                    if let Some(pid) = task.worker_pid() {
                        self.signaller.kill(pid);
                    }
                    tracing::info!(task_ident = %ident, "task killed on user request");
                    task.force_finish(TaskKillReason::User);
                } else if task.is_defunct(now, self.config.task_unresponsive_timeout) {
                    if let Some(pid) = task.worker_pid() {
                        self.signaller.kill(pid);
                    }
                    tracing::warn!(task_ident = %ident, "unresponsive task killed");
                    task.force_finish(TaskKillReason::CompletionTimeout);
                }
            }
        }
        for ident in remove {
            inner.register.remove(&ident);
            tracing::debug!(task_ident = %ident, "task removed from register");
        }
    }

    /// Step 4: reap dead workers and mitigate pool deadlock.
    ///
    /// A deadlock is inferred when a task is queued, every live worker sits
    /// on an executing task, and nothing has been heard from the pool for
    /// `deadlock_threshold_timeout`. One temporary single-task worker is
    /// spawned per tick, capped at `max_worker_count + max_temp_workers`
    /// live workers; at the cap, queued tasks simply wait.
    fn manage_workers(&self, inner: &mut Inner, now: DateTime<Utc>) {
        inner.pool.reap_workers();

        let mut queued = 0usize;
        let mut executed = 0usize;
        for task in inner.register.values() {
            match task.state() {
                TaskState::Queued => queued += 1,
                TaskState::Executed => executed += 1,
                _ => {}
            }
        }

        let live = inner.pool.persistent_worker_count() + inner.pool.temp_worker_count();
        if queued == 0 || executed < live {
            return;
        }

        let threshold = TimeDelta::from_std(self.config.deadlock_threshold_timeout)
            .unwrap_or(TimeDelta::MAX);
        if now - inner.last_message_at < threshold {
            return;
        }

        let cap = self.config.max_worker_count + self.config.max_temp_workers;
        if live >= cap {
            tracing::debug!(live, cap, queued, "worker cap reached, queued tasks wait");
            return;
        }

        tracing::warn!(queued, executed, live, "pool deadlock inferred, spawning temporary worker");
        if let Err(err) = inner.pool.spawn_temp_worker() {
            tracing::error!(%err, "failed to spawn temporary worker");
        }
    }
}

fn authorize(
    permissions: &dyn PermissionsChecker,
    user: &AuthUser,
    task: &Task,
    permission: TaskPermission,
) -> Result<(), SchedulerError> {
    if permissions.is_authorized(user, task.auth_user(), permission) {
        Ok(())
    } else {
        Err(SchedulerError::PermissionDenied {
            username: user.username.clone(),
            task_ident: task.ident().to_string(),
        })
    }
}
