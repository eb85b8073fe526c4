//! Tool process lifecycle: spawn, handshake, call, shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, ListToolsParams,
    ListToolsResult, Tool,
};
use crate::transport::RpcTransport;

/// Default timeout for handshake and calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound on `tools/list` pages fetched during the handshake.
const MAX_LIST_PAGES: usize = 32;

/// How to launch a tool process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// A live, initialized tool process.
///
/// All traffic goes through the owned [`RpcTransport`]; the handle can be
/// shared behind an `Arc` and called concurrently.
pub struct ProcessHandle {
    config: ServerConfig,
    child: Mutex<Child>,
    pid: Option<u32>,
    transport: RpcTransport,
    server_info: InitializeResult,
    tools: Vec<Tool>,
}

impl ProcessHandle {
    /// Spawn the process and run the `initialize` / `tools/list` handshake.
    ///
    /// Fails with [`Error::Spawn`] if the process cannot be started and with
    /// [`Error::Handshake`] if it does not complete the handshake within
    /// `init_timeout`. A process that fails the handshake is killed.
    pub async fn start(config: ServerConfig, init_timeout: Duration) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(Error::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdout")))?;
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(config.name.clone(), stderr);
        }

        let pid = child.id();
        info!(tool = %config.name, pid, command = %config.command, "spawned tool process");

        let transport = RpcTransport::new(stdout, stdin);
        let (server_info, tools) = match handshake(&transport, init_timeout).await {
            Ok(done) => done,
            Err(e) => {
                transport.close();
                let _ = child.kill().await;
                return Err(Error::Handshake(e.to_string()));
            }
        };

        info!(
            tool = %config.name,
            server = server_info.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("unknown"),
            protocol = %server_info.protocol_version,
            tools = tools.len(),
            "tool process initialized"
        );

        Ok(Self {
            config,
            child: Mutex::new(child),
            pid,
            transport,
            server_info,
            tools,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn server_info(&self) -> &InitializeResult {
        &self.server_info
    }

    /// Tools advertised during the handshake.
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn transport(&self) -> &RpcTransport {
        &self.transport
    }

    /// Call a tool by name.
    ///
    /// A result flagged `isError` becomes [`Error::ToolCallFailed`]; a result
    /// that does not parse is [`Error::InvalidResult`] and leaves the
    /// transport usable.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };

        let value = self
            .transport
            .call("tools/call", Some(serde_json::to_value(params)?), timeout)
            .await?;
        let result: CallToolResult = serde_json::from_value(value)
            .map_err(|e| Error::InvalidResult(format!("malformed tools/call result: {e}")))?;

        if result.is_error {
            return Err(Error::ToolCallFailed(result.text()));
        }

        Ok(result)
    }

    /// Check if the OS process is still running.
    pub async fn is_running(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    /// Running, and the transport has seen neither EOF nor a protocol error.
    pub async fn is_healthy(&self) -> bool {
        self.transport.is_open() && self.is_running().await
    }

    /// Fail outstanding calls and kill the process.
    pub async fn shutdown(&self) {
        self.transport.close();

        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!(tool = %self.config.name, "kill failed: {e}");
        }
        info!(tool = %self.config.name, pid = self.pid, "tool process stopped");
    }
}

async fn handshake(
    transport: &RpcTransport,
    timeout: Duration,
) -> Result<(InitializeResult, Vec<Tool>)> {
    let params = serde_json::to_value(InitializeParams::default())?;
    let value = transport.call("initialize", Some(params), timeout).await?;
    let server_info: InitializeResult = serde_json::from_value(value)
        .map_err(|e| Error::Protocol(format!("malformed initialize result: {e}")))?;

    transport.notify("notifications/initialized", None).await?;

    let mut tools = Vec::new();
    let mut cursor = None;
    for _ in 0..MAX_LIST_PAGES {
        let params = serde_json::to_value(ListToolsParams { cursor })?;
        let value = transport.call("tools/list", Some(params), timeout).await?;
        let page: ListToolsResult = serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("malformed tools/list result: {e}")))?;

        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok((server_info, tools)),
        }
    }

    Err(Error::Protocol(format!(
        "tools/list did not finish within {MAX_LIST_PAGES} pages"
    )))
}

fn drain_stderr(tool: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(tool = %tool, "stderr: {line}");
        }
    });
}
