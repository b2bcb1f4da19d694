//! Worker-side command execution for clusterd
//!
//! A worker process reads [`clusterd_ipc::WorkerCommand`] frames from stdin,
//! resolves each command against a [`registry::CommandRegistry`] built at
//! startup, runs the handler, and reports progress and the terminal outcome
//! back on stdout. After every terminal message the worker stops itself with
//! SIGSTOP so the scheduler can collect the message before the worker takes
//! more work; the scheduler resumes it with SIGCONT.

pub mod error;
pub mod executor;
pub mod registry;
pub mod report;
pub mod runner;

pub use error::WorkerError;
pub use executor::{execute_command, MessageSink};
pub use registry::{builtin_registry, CommandError, CommandHandler, CommandParams, CommandRegistry};
pub use report::{ReportProcessor, WorkerReportProcessor};
pub use runner::run_worker;
