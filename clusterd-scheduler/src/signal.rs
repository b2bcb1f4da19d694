//! Process signalling seam
//!
//! The control loop terminates workers with SIGKILL and resumes
//! self-paused workers with SIGCONT. Failures are logged, not propagated:
//! the usual cause is a worker that already exited.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Sends lifecycle signals to worker processes
pub trait ProcessSignaller: Send + Sync {
    /// SIGKILL
    fn kill(&self, pid: u32);

    /// SIGCONT
    fn resume(&self, pid: u32);
}

/// Signaller backed by the real `kill(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct NixSignaller;

impl NixSignaller {
    fn send(&self, pid: u32, signal: Signal) {
        if let Err(err) = kill(Pid::from_raw(pid as i32), signal) {
            tracing::warn!(pid, %signal, %err, "failed to signal worker");
        }
    }
}

impl ProcessSignaller for NixSignaller {
    fn kill(&self, pid: u32) {
        self.send(pid, Signal::SIGKILL);
    }

    fn resume(&self, pid: u32) {
        self.send(pid, Signal::SIGCONT);
    }
}
