//! Git built-ins: git_status, git_log, git_diff

use cache::Payload;
use policy::Policy;
use serde_json::{Value, json};

use super::{BuiltinFunction, display_path, run};
use crate::result::{FailureKind, ToolFailure};
use crate::schema::ToolCallArgs;

const DEFAULT_LOG_COUNT: u64 = 10;
const MAX_LOG_COUNT: u64 = 200;

pub(super) const GIT_STATUS: BuiltinFunction = BuiltinFunction {
    name: "git_status",
    description: "Show the current branch and changed files of a git repository",
    read_only: true,
    schema: status_schema,
};

pub(super) const GIT_LOG: BuiltinFunction = BuiltinFunction {
    name: "git_log",
    description: "Show recent commits, one line each",
    read_only: true,
    schema: log_schema,
};

pub(super) const GIT_DIFF: BuiltinFunction = BuiltinFunction {
    name: "git_diff",
    description: "Show uncommitted changes, optionally only staged ones or only for one path",
    read_only: true,
    schema: diff_schema,
};

fn status_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {
                "type": "string",
                "description": "Repository directory relative to the workspace root (default: root)"
            }
        }
    })
}

fn log_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {
                "type": "string",
                "description": "Repository directory relative to the workspace root (default: root)"
            },
            "count": {
                "type": "integer",
                "description": "Number of commits to show (default: 10)"
            }
        }
    })
}

fn diff_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {
                "type": "string",
                "description": "Limit the diff to this file or directory"
            },
            "staged": {
                "type": "boolean",
                "description": "Show staged changes instead of unstaged ones"
            }
        }
    })
}

pub(super) async fn status(args: &ToolCallArgs, policy: &Policy) -> Result<Payload, ToolFailure> {
    let dir = policy.resolve(args.str("path").unwrap_or("."))?;
    let out = git(&["status", "--porcelain", "-b"], &dir).await?;
    Ok(Payload::Text(out))
}

pub(super) async fn log(args: &ToolCallArgs, policy: &Policy) -> Result<Payload, ToolFailure> {
    let dir = policy.resolve(args.str("path").unwrap_or("."))?;
    let count = args
        .u64("count")
        .unwrap_or(DEFAULT_LOG_COUNT)
        .clamp(1, MAX_LOG_COUNT)
        .to_string();
    let out = git(&["log", "--oneline", "-n", &count], &dir).await?;
    Ok(Payload::Text(out))
}

pub(super) async fn diff(args: &ToolCallArgs, policy: &Policy) -> Result<Payload, ToolFailure> {
    let root = policy.resolve("")?;
    let target = args.str("path").map(|p| policy.resolve(p)).transpose()?;

    let shown = target.as_ref().map(|p| display_path(p, &root));

    let mut git_args = vec!["diff"];
    if args.bool("staged").unwrap_or(false) {
        git_args.push("--staged");
    }
    if let Some(shown) = &shown {
        git_args.push("--");
        git_args.push(shown);
    }

    let out = git(&git_args, &root).await?;
    if out.is_empty() {
        return Ok(Payload::Text("No changes".to_string()));
    }
    Ok(Payload::Text(out))
}

async fn git(args: &[&str], dir: &std::path::Path) -> Result<String, ToolFailure> {
    let output = run("git", args, dir).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolFailure::new(
            FailureKind::ExecutionFailed,
            format!("git {} failed: {}", args[0], stderr.trim()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
