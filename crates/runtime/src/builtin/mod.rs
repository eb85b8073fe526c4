//! Built-in tools executed in-process.
//!
//! Every path argument goes through [`Policy::resolve`] before any
//! filesystem access, and every operation runs under a timeout. Child
//! processes are killed when the timeout drops their future.

mod fs;
mod git;
mod shell;

use std::fmt;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use cache::Payload;
use policy::Policy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;

use crate::result::{FailureKind, ToolFailure};
use crate::schema::{FunctionDeclaration, ToolCallArgs, to_declaration};

const FILESYSTEM: &[BuiltinFunction] = &[fs::LIST_FILES, fs::READ_FILE];
const GIT: &[BuiltinFunction] = &[git::GIT_STATUS, git::GIT_LOG, git::GIT_DIFF];
const SHELL: &[BuiltinFunction] = &[shell::RUN_COMMAND];

/// A built-in tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinKind {
    Filesystem,
    Git,
    Shell,
}

impl BuiltinKind {
    pub const ALL: [BuiltinKind; 3] = [
        BuiltinKind::Filesystem,
        BuiltinKind::Git,
        BuiltinKind::Shell,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinKind::Filesystem => "filesystem",
            BuiltinKind::Git => "git",
            BuiltinKind::Shell => "shell",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn functions(self) -> &'static [BuiltinFunction] {
        match self {
            BuiltinKind::Filesystem => FILESYSTEM,
            BuiltinKind::Git => GIT,
            BuiltinKind::Shell => SHELL,
        }
    }

    pub fn function(self, name: &str) -> Option<&'static BuiltinFunction> {
        self.functions().iter().find(|f| f.name == name)
    }

    pub fn declarations(self) -> Vec<FunctionDeclaration> {
        self.functions().iter().map(BuiltinFunction::declaration).collect()
    }
}

impl fmt::Display for BuiltinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A function exposed by a built-in tool.
#[derive(Debug)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub description: &'static str,
    /// Read-only functions have cacheable results.
    pub read_only: bool,
    schema: fn() -> Value,
}

impl BuiltinFunction {
    pub fn input_schema(&self) -> Value {
        (self.schema)()
    }

    pub fn declaration(&self) -> FunctionDeclaration {
        to_declaration(self.name, self.description, &self.input_schema())
    }
}

/// Run a built-in function under `timeout`.
pub async fn execute(
    kind: BuiltinKind,
    function: &str,
    args: &ToolCallArgs,
    policy: &Policy,
    timeout: Duration,
) -> Result<Payload, ToolFailure> {
    let call = async {
        match (kind, function) {
            (BuiltinKind::Filesystem, "list_files") => fs::list_files(args, policy).await,
            (BuiltinKind::Filesystem, "read_file") => fs::read_file(args, policy).await,
            (BuiltinKind::Git, "git_status") => git::status(args, policy).await,
            (BuiltinKind::Git, "git_log") => git::log(args, policy).await,
            (BuiltinKind::Git, "git_diff") => git::diff(args, policy).await,
            (BuiltinKind::Shell, "run_command") => shell::run_command(args, policy).await,
            _ => Err(ToolFailure::new(
                FailureKind::UnknownTool,
                format!("{kind} has no function '{function}'"),
            )),
        }
    };

    tokio::time::timeout(timeout, call).await.map_err(|_| {
        ToolFailure::new(
            FailureKind::Timeout,
            format!("{kind}.{function} timed out after {timeout:?}"),
        )
    })?
}

/// Run a program to completion in `dir`. Dropping the future kills it.
async fn run(program: &str, args: &[&str], dir: &Path) -> Result<Output, ToolFailure> {
    Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            ToolFailure::new(
                FailureKind::ToolUnavailable,
                format!("failed to run {program}: {e}"),
            )
        })
}

fn required_str<'a>(args: &'a ToolCallArgs, key: &str) -> Result<&'a str, ToolFailure> {
    args.str(key).ok_or_else(|| {
        ToolFailure::new(
            FailureKind::SchemaMismatch,
            format!("missing required argument '{key}'"),
        )
    })
}

/// Path relative to the policy root, for messages and listings.
fn display_path(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaType, coerce};
    use serde_json::json;

    #[test]
    fn names_round_trip() {
        for kind in BuiltinKind::ALL {
            assert_eq!(BuiltinKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(BuiltinKind::from_name("fetch"), None);
    }

    #[test]
    fn only_run_command_has_side_effects() {
        for kind in BuiltinKind::ALL {
            for function in kind.functions() {
                assert_eq!(function.read_only, function.name != "run_command", "{}", function.name);
            }
        }
    }

    #[test]
    fn declarations_are_objects() {
        for kind in BuiltinKind::ALL {
            for decl in kind.declarations() {
                assert_eq!(decl.parameters.kind, SchemaType::Object, "{}", decl.name);
                assert!(!decl.description.is_empty());
            }
        }
    }

    #[tokio::test]
    async fn unknown_function_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::new(dir.path());
        let err = execute(
            BuiltinKind::Git,
            "git_push",
            &ToolCallArgs::default(),
            &policy,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, FailureKind::UnknownTool);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::new(dir.path()).with_commands(["sleep"]);
        let schema = BuiltinKind::Shell.function("run_command").unwrap().input_schema();
        let args = coerce(json!({"command": "sleep 5"}), &schema).unwrap();

        let started = std::time::Instant::now();
        let err = execute(
            BuiltinKind::Shell,
            "run_command",
            &args,
            &policy,
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, FailureKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
