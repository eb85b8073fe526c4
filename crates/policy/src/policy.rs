//! Sandbox policy for built-in tools.

use crate::{Error, Result, resolve};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Shell operators that would let one allowlisted command start another.
const CHAINING_TOKENS: &[&str] = &[";", "&", "|", "`", "$(", ">", "<", "\n", "\r"];

/// Policy applied to every built-in tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Directory every built-in filesystem operation is confined to.
    pub root: PathBuf,

    /// Commands the shell built-in may run (program name or command prefix).
    /// `"*"` allows anything, including shell operators.
    #[serde(default)]
    pub allowed_commands: Vec<String>,
}

/// Result of a command check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl Policy {
    /// Confine built-ins to `root` with no commands allowed.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            allowed_commands: Vec::new(),
        }
    }

    pub fn with_commands(mut self, commands: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_commands = commands.into_iter().map(Into::into).collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a user-supplied path under the root. See [`resolve`].
    pub fn resolve(&self, user_path: &str) -> Result<PathBuf> {
        resolve(&self.root, user_path)
    }

    /// Check a command line against the allowlist.
    pub fn check_command(&self, command: &str) -> Decision {
        let command = command.trim();
        if command.is_empty() {
            return Decision::Deny {
                reason: "empty command".to_string(),
            };
        }

        if self.allowed_commands.iter().any(|a| a == "*") {
            return Decision::Allow;
        }

        if let Some(token) = CHAINING_TOKENS.iter().find(|t| command.contains(**t)) {
            return Decision::Deny {
                reason: format!("shell operator '{}' is not allowed", token.escape_debug()),
            };
        }

        let program = command.split_whitespace().next().unwrap_or_default();
        let allowed = self.allowed_commands.iter().any(|allowed| {
            // Exact program name, or prefix match (e.g., "git status" allows "git status -s")
            program == allowed || command == allowed || command.starts_with(&format!("{allowed} "))
        });

        if allowed {
            Decision::Allow
        } else {
            Decision::Deny {
                reason: format!("'{program}' is not in the command allowlist"),
            }
        }
    }

    /// Check a command line, returning an error if denied.
    pub fn require_command(&self, command: &str) -> Result<()> {
        match self.check_command(command) {
            Decision::Allow => Ok(()),
            Decision::Deny { reason } => Err(Error::Denied(reason)),
        }
    }
}
