//! Line-framed JSON transport
//!
//! Every frame is one JSON-serialized [`MessageEnvelope`] followed by a
//! newline. The scheduler side reads and writes worker pipes with async I/O
//! and uses [`encode_line`]/[`decode_line`] directly; worker processes are
//! single-threaded and use the blocking [`StdioTransport`].

use std::io::{BufRead, BufReader, Stdin, Stdout, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Serialize an envelope into a single newline-terminated frame.
pub fn encode_line<T: Serialize>(envelope: &MessageEnvelope<T>) -> Result<String, IpcError> {
    let mut frame =
        serde_json::to_string(envelope).map_err(|e| IpcError::Serialize(e.to_string()))?;
    frame.push('\n');
    Ok(frame)
}

/// Parse one frame back into an envelope, rejecting incompatible versions.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<MessageEnvelope<T>, IpcError> {
    let envelope: MessageEnvelope<T> =
        serde_json::from_str(line.trim_end()).map_err(|e| IpcError::Deserialize(e.to_string()))?;
    if !envelope.is_compatible() {
        return Err(IpcError::ProtocolVersionMismatch {
            expected: IPC_PROTOCOL_VERSION,
            actual: envelope.protocol_version,
        });
    }
    Ok(envelope)
}

/// Blocking stdio transport used inside worker processes.
///
/// Stdout carries IPC frames only; workers must log to stderr.
pub struct StdioTransport {
    reader: BufReader<Stdin>,
    writer: Stdout,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(std::io::stdin()),
            writer: std::io::stdout(),
        }
    }

    /// Read the next frame. A clean close of the pipe yields `None`; a
    /// close in the middle of a frame is a [`IpcError::ConnectionClosed`].
    pub fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<MessageEnvelope<T>>, IpcError> {
        read_frame(&mut self.reader)
    }

    /// Wrap a message in an envelope and write it as one frame.
    pub fn send<T: Serialize>(&mut self, message: T) -> Result<(), IpcError> {
        let frame = encode_line(&MessageEnvelope::new(message))?;
        self.writer.write_all(frame.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn read_frame<T: DeserializeOwned>(
    reader: &mut impl BufRead,
) -> Result<Option<MessageEnvelope<T>>, IpcError> {
    let mut line = String::new();
    let read = reader.read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    // A frame without its newline means the peer died mid-write.
    if !line.ends_with('\n') {
        return Err(IpcError::ConnectionClosed);
    }
    decode_line(&line).map(Some)
}
