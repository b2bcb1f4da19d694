//! Task record and state machine
//!
//! A task moves monotonically along `Created -> Queued -> Executed ->
//! Finished`. The control loop is the only writer; transitions triggered by
//! worker messages that do not fit the current state are rejected and the
//! caller decides what to do with the message.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use clusterd_ipc::{
    AuthUser, CommandDto, Report, TaskFinishType, TaskKillReason, WorkerCommand,
};

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Queued,
    Executed,
    Finished,
}

/// Read-only snapshot of a task, serialized for HTTP clients
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub task_ident: String,
    pub command: CommandDto,
    pub reports: Vec<Report>,
    pub state: TaskState,
    pub task_finish_type: TaskFinishType,
    pub kill_reason: Option<TaskKillReason>,
    pub result: Option<JsonValue>,
}

/// A worker message arrived for a task that cannot accept it
#[derive(Debug, Error)]
#[error("message does not apply to a task in state {state:?}")]
pub(crate) struct InvalidTransition {
    pub state: TaskState,
}

pub(crate) struct Task {
    ident: String,
    command: CommandDto,
    auth_user: AuthUser,
    /// Submission order, used to keep dispatch FIFO
    sequence: u64,
    state: TaskState,
    worker_pid: Option<u32>,
    finish_type: TaskFinishType,
    kill_reason: Option<TaskKillReason>,
    result: Option<JsonValue>,
    reports: Vec<Report>,
    created_at: DateTime<Utc>,
    last_message_at: Option<DateTime<Utc>>,
    to_delete_at: Option<DateTime<Utc>>,
    kill_requested: bool,
    state_tx: watch::Sender<TaskState>,
}

impl Task {
    pub fn new(
        ident: String,
        command: CommandDto,
        auth_user: AuthUser,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let (state_tx, _) = watch::channel(TaskState::Created);
        Self {
            ident,
            command,
            auth_user,
            sequence,
            state: TaskState::Created,
            worker_pid: None,
            finish_type: TaskFinishType::Unfinished,
            kill_reason: None,
            result: None,
            reports: Vec::new(),
            created_at: now,
            last_message_at: None,
            to_delete_at: None,
            kill_requested: false,
            state_tx,
        }
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn auth_user(&self) -> &AuthUser {
        &self.auth_user
    }

    pub fn worker_pid(&self) -> Option<u32> {
        self.worker_pid
    }

    pub fn kill_requested(&self) -> bool {
        self.kill_requested
    }

    pub fn to_delete_at(&self) -> Option<DateTime<Utc>> {
        self.to_delete_at
    }

    pub fn request_timeout(&self) -> Option<u64> {
        self.command.options.request_timeout
    }

    /// Watch the task's state; the channel closes when the task is removed.
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state_tx.subscribe()
    }

    fn set_state(&mut self, state: TaskState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// Created -> Queued, after the pool accepted the command
    pub fn mark_queued(&mut self) {
        self.set_state(TaskState::Queued);
    }

    /// Queued -> Executed, on `TaskExecuted` from a worker
    pub fn apply_executed(
        &mut self,
        worker_pid: u32,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if self.state != TaskState::Queued {
            return Err(InvalidTransition { state: self.state });
        }
        self.worker_pid = Some(worker_pid);
        self.last_message_at = Some(now);
        self.set_state(TaskState::Executed);
        Ok(())
    }

    /// Executed -> Finished, on `TaskFinished` from a worker.
    ///
    /// Returns the pid of the worker that paused itself so the control loop
    /// can resume it once the message is fully processed.
    pub fn apply_finished(
        &mut self,
        finish_type: TaskFinishType,
        result: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, InvalidTransition> {
        if self.state != TaskState::Executed {
            return Err(InvalidTransition { state: self.state });
        }
        self.finish_type = finish_type;
        self.result = result;
        self.last_message_at = Some(now);
        self.kill_requested = false;
        self.set_state(TaskState::Finished);
        Ok(self.worker_pid)
    }

    /// Reports are attached in arrival order, even after the task finished.
    pub fn push_report(&mut self, report: Report, now: DateTime<Utc>) {
        self.reports.push(report);
        self.last_message_at = Some(now);
    }

    /// Record a user kill. The signal itself is deferred to the control
    /// loop, which waits until a worker pid exists.
    pub fn request_kill(&mut self) {
        self.kill_reason = Some(TaskKillReason::User);
        if self.state != TaskState::Finished {
            self.kill_requested = true;
        }
    }

    /// Terminate the task from the scheduler side.
    ///
    /// A task that already finished keeps its finish type; only the kill
    /// reason is recorded.
    pub fn force_finish(&mut self, reason: TaskKillReason) {
        self.kill_reason = Some(reason);
        self.kill_requested = false;
        if self.state != TaskState::Finished {
            self.finish_type = TaskFinishType::Kill;
            self.set_state(TaskState::Finished);
        }
    }

    /// An executing task that has been silent for longer than `timeout`
    pub fn is_defunct(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.state != TaskState::Executed {
            return false;
        }
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        self.last_message_at
            .is_some_and(|last| now - last > timeout)
    }

    /// A task past `timeout` that nobody observed terminal via `get_task`
    pub fn is_abandoned(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        self.to_delete_at.is_none() && now - self.created_at > timeout
    }

    /// First `get_task` on a finished task arms its removal.
    pub fn observe_terminal(&mut self, now: DateTime<Utc>, grace: Duration) {
        if self.state == TaskState::Finished && self.to_delete_at.is_none() {
            let grace = TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX);
            self.to_delete_at = Some(now + grace);
        }
    }

    pub fn to_info(&self) -> TaskInfo {
        TaskInfo {
            task_ident: self.ident.clone(),
            command: self.command.clone(),
            reports: self.reports.clone(),
            state: self.state,
            task_finish_type: self.finish_type,
            kill_reason: self.kill_reason,
            result: self.result.clone(),
        }
    }

    pub fn to_worker_command(&self) -> WorkerCommand {
        WorkerCommand {
            task_ident: self.ident.clone(),
            command: self.command.clone(),
            auth_user: self.auth_user.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        "2026-02-03T08:30:00Z".parse().unwrap()
    }

    fn task() -> Task {
        Task::new(
            "id0".to_string(),
            CommandDto::new("cluster.start"),
            AuthUser::new("operator", vec![]),
            0,
            now(),
        )
    }

    #[test]
    fn lifecycle_is_monotone() {
        let mut task = task();
        assert_eq!(task.state(), TaskState::Created);

        task.mark_queued();
        assert_eq!(task.state(), TaskState::Queued);

        task.apply_executed(42, now()).unwrap();
        assert_eq!(task.state(), TaskState::Executed);
        assert_eq!(task.worker_pid(), Some(42));

        let pid = task
            .apply_finished(TaskFinishType::Success, Some(json!(1)), now())
            .unwrap();
        assert_eq!(pid, Some(42));
        assert_eq!(task.state(), TaskState::Finished);

        // No way back
        assert!(task.apply_executed(43, now()).is_err());
        assert!(task
            .apply_finished(TaskFinishType::Fail, None, now())
            .is_err());
    }

    #[test]
    fn executed_requires_queued() {
        let mut task = task();
        assert!(task.apply_executed(42, now()).is_err());
        assert_eq!(task.state(), TaskState::Created);
        assert_eq!(task.worker_pid(), None);
    }

    #[test]
    fn finished_requires_executed() {
        let mut task = task();
        task.mark_queued();
        assert!(task
            .apply_finished(TaskFinishType::Success, None, now())
            .is_err());
        assert_eq!(task.state(), TaskState::Queued);
    }

    #[test]
    fn force_finish_preserves_a_terminal_finish_type() {
        let mut task = task();
        task.mark_queued();
        task.apply_executed(42, now()).unwrap();
        task.apply_finished(TaskFinishType::Success, None, now())
            .unwrap();

        task.force_finish(TaskKillReason::User);
        let info = task.to_info();
        assert_eq!(info.task_finish_type, TaskFinishType::Success);
        assert_eq!(info.kill_reason, Some(TaskKillReason::User));
    }

    #[test]
    fn defunct_boundary_is_strict() {
        let timeout = Duration::from_secs(60);
        let mut task = task();
        task.mark_queued();
        task.apply_executed(42, now()).unwrap();

        assert!(!task.is_defunct(now() + TimeDelta::seconds(60), timeout));
        assert!(task.is_defunct(now() + TimeDelta::seconds(61), timeout));
    }

    #[test]
    fn only_executed_tasks_can_be_defunct() {
        let timeout = Duration::from_secs(60);
        let late = now() + TimeDelta::seconds(3600);

        let mut task = task();
        assert!(!task.is_defunct(late, timeout));
        task.mark_queued();
        assert!(!task.is_defunct(late, timeout));
    }

    #[test]
    fn abandoned_boundary_is_strict() {
        let timeout = Duration::from_secs(3600);
        let task = task();
        assert!(!task.is_abandoned(now() + TimeDelta::seconds(3600), timeout));
        assert!(task.is_abandoned(now() + TimeDelta::seconds(3601), timeout));
    }

    #[test]
    fn observed_tasks_are_never_abandoned() {
        let mut task = task();
        task.mark_queued();
        task.apply_executed(42, now()).unwrap();
        task.apply_finished(TaskFinishType::Success, None, now())
            .unwrap();
        task.observe_terminal(now(), Duration::from_secs(60));
        assert_eq!(task.to_delete_at(), Some(now() + TimeDelta::seconds(60)));

        assert!(!task.is_abandoned(now() + TimeDelta::days(30), Duration::from_secs(3600)));
    }

    #[test]
    fn observe_terminal_only_applies_to_finished_tasks() {
        let mut task = task();
        task.observe_terminal(now(), Duration::from_secs(60));
        assert_eq!(task.to_delete_at(), None);
    }

    #[test]
    fn late_reports_attach_after_finish() {
        let mut task = task();
        task.mark_queued();
        task.apply_executed(42, now()).unwrap();
        task.apply_finished(TaskFinishType::Success, None, now())
            .unwrap();

        task.push_report(Report::error("LATE", json!({})), now());
        assert_eq!(task.to_info().reports.len(), 1);
    }

    #[test]
    fn kill_request_on_a_finished_task_only_records_the_reason() {
        let mut task = task();
        task.mark_queued();
        task.apply_executed(42, now()).unwrap();
        task.apply_finished(TaskFinishType::Success, None, now())
            .unwrap();

        task.request_kill();
        assert!(!task.kill_requested());
        assert_eq!(task.to_info().kill_reason, Some(TaskKillReason::User));
        assert_eq!(task.to_info().task_finish_type, TaskFinishType::Success);
    }

    #[test]
    fn subscribers_see_terminal_transitions() {
        let mut task = task();
        let rx = task.subscribe();
        task.mark_queued();
        task.apply_executed(42, now()).unwrap();
        task.apply_finished(TaskFinishType::Success, None, now())
            .unwrap();
        assert_eq!(*rx.borrow(), TaskState::Finished);
    }
}
