//! Worker process error types

use thiserror::Error;

use clusterd_ipc::IpcError;

/// Errors that abort the worker loop
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("IPC failure: {0}")]
    Ipc(#[from] IpcError),

    #[error("signal failure: {0}")]
    Signal(#[from] nix::Error),
}
