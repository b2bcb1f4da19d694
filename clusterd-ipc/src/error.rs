//! IPC error types

use thiserror::Error;

/// Errors raised while framing or exchanging IPC messages
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("I/O error on IPC channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize message: {0}")]
    Serialize(String),

    #[error("failed to deserialize message: {0}")]
    Deserialize(String),

    #[error("IPC channel closed by peer")]
    ConnectionClosed,

    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },
}
