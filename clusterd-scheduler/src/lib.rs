//! Asynchronous task scheduler for the clusterd daemon
//!
//! The scheduler accepts long-running administrative commands, dispatches
//! them to a bounded pool of worker processes, folds worker messages back
//! into per-task state, and enforces lifecycle timeouts, user kills and
//! deadlock mitigation - all from a single cooperative control loop driven
//! by [`Scheduler::perform_actions`].
//!
//! Public entry points are on [`Scheduler`]: `new_task`, `get_task`,
//! `kill_task`, `wait_for_task` and `perform_actions`. HTTP handlers call
//! these; every mutation is serialized through one internal lock, so the
//! control loop never races its callers.

pub mod clock;
pub mod error;
pub mod ident;
pub mod logging;
pub mod permissions;
pub mod pool;
pub mod scheduler;
pub mod signal;
pub mod task;

pub use clock::{Clock, SystemClock};
pub use error::SchedulerError;
pub use ident::{TaskIdentSource, UuidIdentSource};
pub use logging::init_tracing;
pub use permissions::{GroupPermissionsChecker, PermissionsChecker, TaskPermission};
pub use pool::{PoolConfig, PoolError, ProcessWorkerPool, SubmitError, WorkerPool};
pub use scheduler::{Scheduler, SchedulerEnv, TaskStateCounts};
pub use signal::{NixSignaller, ProcessSignaller};
pub use task::{TaskInfo, TaskState};
