//! Test doubles and fixtures for the scheduler integration suite

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use clusterd_config::SchedulerConfig;
use clusterd_ipc::{
    AuthUser, CommandDto, Report, TaskFinishType, TaskMessage, TaskPayload, WorkerCommand,
};
use clusterd_scheduler::{
    Clock, GroupPermissionsChecker, PoolError, ProcessSignaller, Scheduler, SchedulerEnv,
    SubmitError, TaskIdentSource, TaskStateCounts, WorkerPool,
};
use clusterd_worker::{CommandError, CommandParams, CommandRegistry, ReportProcessor};

pub fn datetime_now() -> DateTime<Utc> {
    "2026-02-03T08:30:00Z".parse().unwrap()
}

pub fn auth_user() -> AuthUser {
    AuthUser::new("operator", vec![])
}

/// Settable wall clock
pub struct MockClock {
    now: Mutex<DateTime<Utc>>,
}

impl MockClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, delta: Duration) {
        *self.now.lock().unwrap() += TimeDelta::from_std(delta).unwrap();
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Deterministic identifiers: id0, id1, ...
#[derive(Default)]
pub struct SequentialIdents(AtomicUsize);

impl TaskIdentSource for SequentialIdents {
    fn next_ident(&self) -> String {
        format!("id{}", self.0.fetch_add(1, Ordering::SeqCst))
    }
}

/// Records signals instead of sending them
#[derive(Default)]
pub struct RecordingSignaller {
    kills: Mutex<Vec<u32>>,
    resumes: Mutex<Vec<u32>>,
}

impl RecordingSignaller {
    pub fn kills(&self) -> Vec<u32> {
        self.kills.lock().unwrap().clone()
    }

    pub fn resumes(&self) -> Vec<u32> {
        self.resumes.lock().unwrap().clone()
    }
}

impl ProcessSignaller for RecordingSignaller {
    fn kill(&self, pid: u32) {
        self.kills.lock().unwrap().push(pid);
    }

    fn resume(&self, pid: u32) {
        self.resumes.lock().unwrap().push(pid);
    }
}

pub struct MockTempWorker {
    pub task_limit: u32,
    pub alive: bool,
}

/// Bookkeeping shared between the mock pool and the test body
#[derive(Default)]
pub struct MockPoolState {
    pub submitted: Vec<WorkerCommand>,
    /// Refuse submissions beyond this many; `None` accepts everything
    pub capacity: Option<usize>,
    pub persistent: usize,
    pub temps: Vec<MockTempWorker>,
    pub temp_spawns: usize,
    pub shutdown: bool,
}

pub struct MockWorkerPool {
    pub state: Arc<Mutex<MockPoolState>>,
}

impl WorkerPool for MockWorkerPool {
    fn try_submit(&mut self, command: WorkerCommand) -> Result<(), SubmitError> {
        let mut state = self.state.lock().unwrap();
        if let Some(capacity) = state.capacity {
            if state.submitted.len() >= capacity {
                return Err(SubmitError::Full);
            }
        }
        state.submitted.push(command);
        Ok(())
    }

    fn persistent_worker_count(&self) -> usize {
        self.state.lock().unwrap().persistent
    }

    fn temp_worker_count(&self) -> usize {
        self.state.lock().unwrap().temps.len()
    }

    fn spawn_temp_worker(&mut self) -> Result<(), PoolError> {
        let mut state = self.state.lock().unwrap();
        state.temp_spawns += 1;
        state.temps.push(MockTempWorker {
            task_limit: 1,
            alive: true,
        });
        Ok(())
    }

    fn reap_workers(&mut self) {
        self.state.lock().unwrap().temps.retain(|temp| temp.alive);
    }

    fn shutdown(&mut self) {
        self.state.lock().unwrap().shutdown = true;
    }
}

/// Registry with the command names the integration tests submit
pub fn test_registry() -> Arc<CommandRegistry> {
    let mut registry = CommandRegistry::new();
    for name in ["success", "success_with_reports", "lib_error"] {
        registry.register(
            name,
            |_: &CommandParams,
             _: &mut dyn ReportProcessor|
             -> Result<Option<JsonValue>, CommandError> { Ok(None) },
        );
    }
    Arc::new(registry)
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        max_worker_count: 3,
        max_temp_workers: 2,
        deadlock_threshold_timeout: Duration::from_secs(10),
        task_unresponsive_timeout: Duration::from_secs(60),
        task_abandoned_timeout: Duration::from_secs(3600),
        delete_after_terminal: Duration::from_secs(10),
        worker_task_limit: None,
        worker_binary: None,
    }
}

/// A scheduler wired to a mock pool, mock clock, sequential idents and a
/// recording signaller, plus direct access to the message queue so tests
/// can play the worker side.
pub struct TestScheduler {
    pub scheduler: Scheduler,
    pub messages: mpsc::UnboundedSender<TaskMessage>,
    pub clock: Arc<MockClock>,
    pub signaller: Arc<RecordingSignaller>,
    pub pool: Arc<Mutex<MockPoolState>>,
}

pub fn test_scheduler(config: SchedulerConfig) -> TestScheduler {
    let clock = Arc::new(MockClock::new(datetime_now()));
    let signaller = Arc::new(RecordingSignaller::default());
    let pool = Arc::new(Mutex::new(MockPoolState {
        persistent: config.max_worker_count,
        ..Default::default()
    }));
    let (messages, message_rx) = mpsc::unbounded_channel();

    let env = SchedulerEnv {
        clock: clock.clone(),
        signaller: signaller.clone(),
        idents: Arc::new(SequentialIdents::default()),
        permissions: Arc::new(GroupPermissionsChecker::new(vec!["admins".to_string()])),
    };
    let scheduler = Scheduler::new(
        config,
        Box::new(MockWorkerPool { state: pool.clone() }),
        message_rx,
        test_registry(),
        env,
    );

    TestScheduler {
        scheduler,
        messages,
        clock,
        signaller,
        pool,
    }
}

impl TestScheduler {
    /// Submit `count` "success" tasks; idents come back as id0, id1, ...
    pub async fn create_tasks(&self, count: usize) -> Vec<String> {
        let mut idents = Vec::new();
        for _ in 0..count {
            idents.push(
                self.scheduler
                    .new_task(CommandDto::new("success"), auth_user())
                    .await
                    .unwrap(),
            );
        }
        idents
    }

    /// Play the worker side picking tasks up. The pid of a task is its
    /// ident stripped of the "id" prefix.
    pub fn execute_tasks(&self, idents: &[&str]) {
        for ident in idents {
            self.messages
                .send(TaskMessage::new(
                    *ident,
                    TaskPayload::TaskExecuted {
                        worker_pid: pid_of(ident),
                    },
                ))
                .unwrap();
        }
    }

    /// Play the worker side handing over terminal results.
    pub fn finish_tasks(
        &self,
        idents: &[&str],
        finish_type: TaskFinishType,
        result: Option<JsonValue>,
    ) {
        for ident in idents {
            self.messages
                .send(TaskMessage::new(
                    *ident,
                    TaskPayload::TaskFinished {
                        finish_type,
                        result: result.clone(),
                    },
                ))
                .unwrap();
        }
    }

    pub fn report_task(&self, ident: &str, report: Report) {
        self.messages
            .send(TaskMessage::new(
                ident,
                TaskPayload::TaskReport { report },
            ))
            .unwrap();
    }

    pub async fn assert_counts(&self, created: usize, queued: usize, executed: usize, finished: usize) {
        assert_eq!(
            self.scheduler.state_counts().await,
            TaskStateCounts {
                created,
                queued,
                executed,
                finished,
            }
        );
    }
}

pub fn pid_of(ident: &str) -> u32 {
    ident.trim_start_matches("id").parse().unwrap()
}
