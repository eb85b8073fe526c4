//! Invocation lifecycle and the result returned to callers.

use std::fmt;

use cache::Payload;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::Error;
use crate::schema::SchemaMismatch;

/// Why an invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PathEscape,
    ToolUnavailable,
    ToolInitFailed,
    Timeout,
    ProtocolError,
    ProcessExited,
    SchemaMismatch,
    UnknownTool,
    CommandDenied,
    ExecutionFailed,
}

impl FailureKind {
    /// Whether repeating the same call can reasonably succeed.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            FailureKind::PathEscape
                | FailureKind::SchemaMismatch
                | FailureKind::UnknownTool
                | FailureKind::CommandDenied
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::PathEscape => "path_escape",
            FailureKind::ToolUnavailable => "tool_unavailable",
            FailureKind::ToolInitFailed => "tool_init_failed",
            FailureKind::Timeout => "timeout",
            FailureKind::ProtocolError => "protocol_error",
            FailureKind::ProcessExited => "process_exited",
            FailureKind::SchemaMismatch => "schema_mismatch",
            FailureKind::UnknownTool => "unknown_tool",
            FailureKind::CommandDenied => "command_denied",
            FailureKind::ExecutionFailed => "execution_failed",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured failure carried in a [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

impl ToolFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }
}

impl From<mcp::Error> for ToolFailure {
    fn from(e: mcp::Error) -> Self {
        let kind = match &e {
            mcp::Error::Spawn(_) => FailureKind::ToolUnavailable,
            mcp::Error::Handshake(_) => FailureKind::ToolInitFailed,
            mcp::Error::Timeout(_) => FailureKind::Timeout,
            mcp::Error::ProcessExited | mcp::Error::Io(_) => FailureKind::ProcessExited,
            mcp::Error::Protocol(_)
            | mcp::Error::InvalidResult(_)
            | mcp::Error::Serialize(_)
            | mcp::Error::OutputTooLarge { .. } => FailureKind::ProtocolError,
            mcp::Error::JsonRpc(_) | mcp::Error::ToolCallFailed(_) => FailureKind::ExecutionFailed,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<policy::Error> for ToolFailure {
    fn from(e: policy::Error) -> Self {
        let kind = match &e {
            policy::Error::PathEscape { .. } => FailureKind::PathEscape,
            policy::Error::Denied(_) => FailureKind::CommandDenied,
            _ => FailureKind::ExecutionFailed,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<SchemaMismatch> for ToolFailure {
    fn from(e: SchemaMismatch) -> Self {
        Self::new(FailureKind::SchemaMismatch, e.to_string())
    }
}

impl From<Error> for ToolFailure {
    fn from(e: Error) -> Self {
        match e {
            Error::Mcp(e) => e.into(),
            Error::Policy(e) => e.into(),
            Error::UnknownTool(name) => {
                Self::new(FailureKind::UnknownTool, format!("unknown tool: {name}"))
            }
            other => Self::new(FailureKind::ExecutionFailed, other.to_string()),
        }
    }
}

/// Outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { output: Payload },
    Failure { error: ToolFailure },
}

/// What [`Orchestrator::invoke`](crate::Orchestrator::invoke) returns.
///
/// Cached and fresh results have the same shape; only `from_cache` differs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub invocation_id: Uuid,
    pub tool: String,
    pub function: String,
    pub from_cache: bool,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn output(&self) -> Option<&Payload> {
        match &self.outcome {
            Outcome::Success { output } => Some(output),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&ToolFailure> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { error } => Some(error),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure().map(|f| f.kind)
    }
}

/// Lifecycle of one invocation.
///
/// `Pending -> {Executing, CacheHit} -> {Succeeded, Failed}`. A call rejected
/// before it executes goes straight from `Pending` to `Failed`. Terminal
/// states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum InvocationState {
    Pending,
    Executing,
    CacheHit,
    Succeeded,
    Failed(FailureKind),
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, InvocationState::Succeeded | InvocationState::Failed(_))
    }

    fn can_become(self, next: InvocationState) -> bool {
        use InvocationState::*;
        matches!(
            (self, next),
            (Pending, Executing | CacheHit | Failed(_))
                | (Executing, Succeeded | Failed(_))
                | (CacheHit, Succeeded)
        )
    }
}

/// One call to a tool function, identified by a fresh UUID.
#[derive(Debug, Clone)]
pub struct Invocation {
    id: Uuid,
    tool: String,
    function: String,
    state: InvocationState,
}

impl Invocation {
    pub fn new(tool: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool: tool.into(),
            function: function.into(),
            state: InvocationState::Pending,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    /// Move to `next`. Returns false, leaving the state unchanged, if the
    /// transition is not allowed.
    pub fn advance(&mut self, next: InvocationState) -> bool {
        if !self.state.can_become(next) {
            warn!(
                invocation = %self.id,
                from = ?self.state,
                to = ?next,
                "ignoring invalid invocation transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    /// Finish with a success.
    pub fn succeed(mut self, output: Payload) -> ToolResult {
        let from_cache = self.state == InvocationState::CacheHit;
        self.advance(InvocationState::Succeeded);
        self.into_result(from_cache, Outcome::Success { output })
    }

    /// Finish with a failure.
    pub fn fail(mut self, error: ToolFailure) -> ToolResult {
        self.advance(InvocationState::Failed(error.kind));
        self.into_result(false, Outcome::Failure { error })
    }

    fn into_result(self, from_cache: bool, outcome: Outcome) -> ToolResult {
        ToolResult {
            invocation_id: self.id,
            tool: self.tool,
            function: self.function,
            from_cache,
            outcome,
        }
    }
}
