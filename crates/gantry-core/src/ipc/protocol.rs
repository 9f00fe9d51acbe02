//! IPC protocol messages for gantry worker processes.
//!
//! Uses length-prefixed JSON messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + JSON-encoded message.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::ids::RequestId;
use crate::worker::RawMessage;

/// Reject frames larger than this (100MB).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Request sent from parent to worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    /// Correlation id; replies and events carry it as `parent_id`.
    pub msg_id: RequestId,
    /// `execute_request`, `complete_request`, `inspect_request`,
    /// `kernel_info_request`, `interrupt_request` or `shutdown_request`.
    pub msg_type: String,
    /// Request payload.
    pub content: Value,
}

impl WireRequest {
    /// Build a request with a fresh correlation id.
    pub fn new(msg_type: impl Into<String>, content: Value) -> Self {
        Self {
            msg_id: RequestId::new(),
            msg_type: msg_type.into(),
            content,
        }
    }
}

/// Logical channel a worker message was published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireChannel {
    /// Direct replies to requests.
    Shell,
    /// Broadcast events (output, status).
    Iopub,
}

/// Message sent from worker to parent process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Channel the message belongs to.
    pub channel: WireChannel,
    /// Worker-assigned message id.
    #[serde(default)]
    pub msg_id: String,
    /// Message type.
    pub msg_type: String,
    /// Id of the request that caused this message.
    #[serde(default)]
    pub parent_id: Option<RequestId>,
    /// Payload.
    #[serde(default)]
    pub content: Value,
}

impl From<WireMessage> for RawMessage {
    fn from(msg: WireMessage) -> Self {
        RawMessage {
            parent_id: msg.parent_id,
            msg_type: msg.msg_type,
            content: msg.content,
        }
    }
}

/// Write a message to a writer using length-prefixed JSON encoding.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(Error::Protocol(format!(
            "IPC message too large: {} bytes",
            bytes.len()
        )));
    }

    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|e| Error::Channel(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| Error::Channel(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Channel(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read a message from a reader using length-prefixed JSON encoding.
///
/// Returns `Ok(None)` when the stream ends at a frame boundary.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(Error::Channel(format!(
                "Failed to read IPC message length: {}",
                e
            )));
        }
    }
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(Error::Protocol(format!(
            "IPC message too large: {} bytes",
            len
        )));
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| Error::Channel(format!("Failed to read IPC message body: {}", e)))?;

    let message = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Protocol(format!("Failed to decode IPC message: {}", e)))?;

    Ok(Some(message))
}
