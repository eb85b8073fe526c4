//! Tool-process protocol errors.

use std::time::Duration;

use crate::protocol::JsonRpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn tool process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("tool process exited")]
    ProcessExited,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The stream itself is unusable: bad framing or oversized messages.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A well-framed response whose result body does not match the method.
    #[error("invalid result: {0}")]
    InvalidResult(String),

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("tool call failed: {0}")]
    ToolCallFailed(String),

    #[error("output too large: {size} bytes (max {max})")]
    OutputTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
