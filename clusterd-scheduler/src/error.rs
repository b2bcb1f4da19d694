//! Scheduler error types

use thiserror::Error;

/// Errors surfaced to API callers
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("task {0} does not exist")]
    TaskNotFound(String),

    #[error("user {username} may not access task {task_ident}")]
    PermissionDenied {
        username: String,
        task_ident: String,
    },

    #[error("command {0} is not registered")]
    CommandNotRegistered(String),

    #[error("timed out waiting for task {0}")]
    WaitTimeout(String),
}
