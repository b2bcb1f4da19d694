//! Protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// The user a command was submitted as, captured at submission time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub username: String,
    pub groups: Vec<String>,
}

impl AuthUser {
    pub fn new(username: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            username: username.into(),
            groups,
        }
    }
}

/// Per-command options supplied by the client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOptionsDto {
    /// How long a client is willing to wait for the task, in seconds
    #[serde(default)]
    pub request_timeout: Option<u64>,
}

/// A command submission as received from a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDto {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Map<String, JsonValue>,
    #[serde(default)]
    pub options: CommandOptionsDto,
}

impl CommandDto {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: serde_json::Map::new(),
            options: CommandOptionsDto::default(),
        }
    }
}

/// Severity of a diagnostic report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// A diagnostic report emitted by a command handler while it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub severity: ReportSeverity,
    pub code: String,
    #[serde(default)]
    pub info: JsonValue,
}

impl Report {
    pub fn new(severity: ReportSeverity, code: impl Into<String>, info: JsonValue) -> Self {
        Self {
            severity,
            code: code.into(),
            info,
        }
    }

    pub fn error(code: impl Into<String>, info: JsonValue) -> Self {
        Self::new(ReportSeverity::Error, code, info)
    }
}

/// How a task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskFinishType {
    /// The task has not reached a terminal state yet
    Unfinished,
    Success,
    Fail,
    UnhandledException,
    Kill,
}

/// Why a task was killed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKillReason {
    User,
    CompletionTimeout,
    InternalMessagingError,
}

/// Messages flowing from worker processes to the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    /// A worker picked the task up and started running its command
    TaskExecuted { worker_pid: u32 },

    /// The command reached a terminal state
    TaskFinished {
        finish_type: TaskFinishType,
        result: Option<JsonValue>,
    },

    /// A diagnostic report produced while the command runs
    TaskReport { report: Report },
}

/// Envelope tagging a payload with the task it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_ident: String,
    pub payload: TaskPayload,
}

impl TaskMessage {
    pub fn new(task_ident: impl Into<String>, payload: TaskPayload) -> Self {
        Self {
            task_ident: task_ident.into(),
            payload,
        }
    }
}

/// A unit of work handed to a worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub task_ident: String,
    pub command: CommandDto,
    pub auth_user: AuthUser,
}

/// Wire envelope for all IPC frames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
