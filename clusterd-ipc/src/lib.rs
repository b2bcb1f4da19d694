//! Inter-process communication between the clusterd scheduler and its
//! worker processes.
//!
//! Workers receive [`WorkerCommand`]s on stdin and report progress back on
//! stdout as [`TaskMessage`]s. Both directions use newline-delimited JSON
//! frames wrapped in a versioned [`MessageEnvelope`]; stderr stays free for
//! worker log output.

pub mod error;
pub mod protocol;
pub mod transport;

pub use error::IpcError;
pub use protocol::{
    AuthUser, CommandDto, CommandOptionsDto, MessageEnvelope, Report, ReportSeverity, TaskMessage,
    TaskFinishType, TaskKillReason, TaskPayload, WorkerCommand, IPC_PROTOCOL_VERSION,
};
pub use transport::{decode_line, encode_line, StdioTransport};
