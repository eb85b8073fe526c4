//! JSON-RPC client for tool processes spoken to over stdio.
//!
//! A [`ProcessHandle`] owns one child process and a multiplexed
//! [`RpcTransport`] over its stdin/stdout. Any number of callers may share a
//! handle; responses are matched to callers by request ID.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{DEFAULT_TIMEOUT, ProcessHandle, ServerConfig};
//! use std::collections::HashMap;
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ServerConfig {
//!     name: "fetch".to_string(),
//!     command: "uvx".to_string(),
//!     args: vec!["mcp-server-fetch".to_string()],
//!     env: HashMap::new(),
//!     cwd: None,
//! };
//!
//! let handle = ProcessHandle::start(config, DEFAULT_TIMEOUT).await?;
//! for tool in handle.tools() {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let result = handle
//!     .call_tool("fetch", serde_json::json!({"url": "https://example.com"}), DEFAULT_TIMEOUT)
//!     .await?;
//! println!("{}", result.text());
//!
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod process;
mod protocol;
mod transport;

pub use error::{Error, Result};
pub use process::{DEFAULT_TIMEOUT, ProcessHandle, ServerConfig};
pub use protocol::{
    CallToolParams, CallToolResult, EmbeddedResource, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    PROTOCOL_VERSION, RequestId, ServerInfo, Tool, ToolContent,
};
pub use transport::{MAX_MESSAGE_SIZE, MessageKind, RpcTransport, TransportState, classify_message};
