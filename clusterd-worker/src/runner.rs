//! Worker process loop
//!
//! Reads one command at a time from the scheduler, executes it, then stops
//! the own process with SIGSTOP so the terminal message is collected before
//! the pool can hand over more work. The scheduler resumes the worker with
//! SIGCONT. A worker started with a task limit exits once the limit is
//! reached; temporary deadlock-mitigation workers run with a limit of 1.

use nix::sys::signal::{raise, Signal};

use clusterd_ipc::{IpcError, StdioTransport, TaskMessage, WorkerCommand};

use crate::error::WorkerError;
use crate::executor::{execute_command, MessageSink};
use crate::registry::CommandRegistry;

struct TransportSink<'a> {
    transport: &'a mut StdioTransport,
}

impl MessageSink for TransportSink<'_> {
    fn send(&mut self, message: TaskMessage) -> Result<(), clusterd_ipc::IpcError> {
        self.transport.send(message)
    }
}

/// Run the worker loop until stdin closes or the task limit is reached.
pub fn run_worker(
    registry: &CommandRegistry,
    transport: &mut StdioTransport,
    task_limit: Option<u32>,
) -> Result<(), WorkerError> {
    let pid = std::process::id();
    tracing::info!(pid, ?task_limit, "worker ready");

    let mut completed: u32 = 0;
    loop {
        let envelope = match transport.recv::<WorkerCommand>() {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                tracing::info!(pid, "scheduler closed the command pipe, exiting");
                break;
            }
            Err(IpcError::Deserialize(err)) => {
                tracing::error!(pid, %err, "ignoring unparseable command frame");
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let task_ident = envelope.message.task_ident.clone();
        {
            let mut sink = TransportSink { transport };
            execute_command(registry, &mut sink, envelope.message)?;
        }
        completed += 1;

        // The terminal message is in the pipe; stop until the scheduler has
        // processed it and sends SIGCONT.
        tracing::debug!(pid, task_ident = %task_ident, "pausing after terminal message");
        raise(Signal::SIGSTOP)?;

        if task_limit.is_some_and(|limit| completed >= limit) {
            tracing::info!(pid, completed, "task limit reached, exiting");
            break;
        }
    }
    Ok(())
}
