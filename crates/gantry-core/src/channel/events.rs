//! Closed event types decoded from raw worker messages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CHANNEL_FAILURE;
use crate::worker::RawMessage;

/// Rich output keyed by MIME type (`text/plain`, `text/html`, `image/png`, ...).
pub type MimeBundle = BTreeMap<String, Value>;

/// Output stream a text chunk was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// One piece of output produced by an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum OutputEvent {
    /// Text written to stdout or stderr.
    Stream { name: StreamName, text: String },

    /// Value of the last expression.
    ExecuteResult {
        data: MimeBundle,
        execution_count: Option<u64>,
    },

    /// Rich output published by the code.
    DisplayData { data: MimeBundle },

    /// Runtime error raised by the code, or a transport failure.
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl OutputEvent {
    /// Stdout text chunk.
    pub fn stdout(text: impl Into<String>) -> Self {
        OutputEvent::Stream {
            name: StreamName::Stdout,
            text: text.into(),
        }
    }

    /// Whether this is an error entry.
    pub fn is_error(&self) -> bool {
        matches!(self, OutputEvent::Error { .. })
    }

    /// Whether this is the terminal event of a failed transport.
    pub fn is_channel_failure(&self) -> bool {
        matches!(self, OutputEvent::Error { ename, .. } if ename == CHANNEL_FAILURE)
    }
}

/// Execution state reported by a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelState {
    Starting,
    Busy,
    Idle,
}

/// A worker message after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelMessage {
    /// Output belonging to an execution.
    Event(OutputEvent),
    /// Busy/idle transition.
    Status(KernelState),
}

#[derive(Deserialize)]
struct StatusContent {
    execution_state: KernelState,
}

impl KernelMessage {
    /// Decode a raw message.
    ///
    /// Returns `None` for message types outside the output/status set and
    /// for known types whose payload does not match the expected shape.
    pub fn decode(raw: &RawMessage) -> Option<Self> {
        match raw.msg_type.as_str() {
            "stream" | "execute_result" | "display_data" | "error" => {
                let mut content = match &raw.content {
                    Value::Object(map) => map.clone(),
                    _ => {
                        tracing::warn!("Ignoring {} message without an object payload", raw.msg_type);
                        return None;
                    }
                };
                content.insert("output_type".to_string(), Value::String(raw.msg_type.clone()));

                match serde_json::from_value(Value::Object(content)) {
                    Ok(event) => Some(KernelMessage::Event(event)),
                    Err(e) => {
                        tracing::warn!("Ignoring malformed {} message: {}", raw.msg_type, e);
                        None
                    }
                }
            }
            "status" => match serde_json::from_value::<StatusContent>(raw.content.clone()) {
                Ok(status) => Some(KernelMessage::Status(status.execution_state)),
                Err(e) => {
                    tracing::warn!("Ignoring malformed status message: {}", e);
                    None
                }
            },
            _ => None,
        }
    }
}
