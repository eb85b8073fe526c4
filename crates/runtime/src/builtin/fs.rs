//! Filesystem built-ins: list_files, read_file

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use cache::Payload;
use policy::Policy;
use serde_json::{Value, json};

use super::{BuiltinFunction, display_path, required_str};
use crate::result::{FailureKind, ToolFailure};
use crate::schema::ToolCallArgs;

const DEFAULT_MAX_ENTRIES: usize = 500;

pub(super) const LIST_FILES: BuiltinFunction = BuiltinFunction {
    name: "list_files",
    description: "List files and directories under a path in the workspace",
    read_only: true,
    schema: list_files_schema,
};

pub(super) const READ_FILE: BuiltinFunction = BuiltinFunction {
    name: "read_file",
    description: "Read a UTF-8 text file from the workspace",
    read_only: true,
    schema: read_file_schema,
};

fn list_files_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {
                "type": "string",
                "description": "Directory relative to the workspace root (default: root)"
            },
            "recursive": {
                "type": "boolean",
                "description": "Descend into subdirectories"
            },
            "max_entries": {
                "type": "integer",
                "description": "Maximum entries to return (default: 500)"
            }
        }
    })
}

fn read_file_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {
                "type": "string",
                "description": "File path relative to the workspace root"
            },
            "offset": {
                "type": "integer",
                "description": "Number of lines to skip"
            },
            "limit": {
                "type": "integer",
                "description": "Maximum number of lines to return"
            }
        },
        "required": ["path"]
    })
}

pub(super) async fn list_files(
    args: &ToolCallArgs,
    policy: &Policy,
) -> Result<Payload, ToolFailure> {
    let root = policy.resolve("")?;
    let dir = policy.resolve(args.str("path").unwrap_or("."))?;
    let recursive = args.bool("recursive").unwrap_or(false);
    let max_entries = args
        .u64("max_entries")
        .map_or(DEFAULT_MAX_ENTRIES, |n| usize::try_from(n).unwrap_or(usize::MAX))
        .max(1);

    let meta = tokio::fs::metadata(&dir)
        .await
        .map_err(|e| io_failure(e, &dir, &root))?;
    if !meta.is_dir() {
        return Err(ToolFailure::new(
            FailureKind::ExecutionFailed,
            format!("{} is not a directory", display_path(&dir, &root)),
        ));
    }

    let mut entries = Vec::new();
    let mut truncated = false;
    let mut pending = vec![dir];

    'walk: while let Some(current) = pending.pop() {
        let mut subdirs = Vec::new();
        for (path, is_dir) in read_sorted(&current, &root).await? {
            if entries.len() >= max_entries {
                truncated = true;
                break 'walk;
            }
            let shown = display_path(&path, &root);
            if is_dir {
                entries.push(format!("{shown}/"));
                if recursive {
                    subdirs.push(path);
                }
            } else {
                entries.push(shown);
            }
        }
        pending.extend(subdirs.into_iter().rev());
    }

    if entries.is_empty() {
        return Ok(Payload::Text("(empty directory)".to_string()));
    }

    let mut listing = entries.join("\n");
    if truncated {
        listing.push_str(&format!("\n... (stopped after {max_entries} entries)"));
    }
    Ok(Payload::Text(listing))
}

/// Directory entries sorted by name. Symlinks are reported but never
/// descended into.
async fn read_sorted(dir: &Path, root: &Path) -> Result<Vec<(PathBuf, bool)>, ToolFailure> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_failure(e, dir, root))?;
    let mut children = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| io_failure(e, dir, root))?
    {
        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
        children.push((entry.path(), is_dir));
    }
    children.sort();
    Ok(children)
}

pub(super) async fn read_file(
    args: &ToolCallArgs,
    policy: &Policy,
) -> Result<Payload, ToolFailure> {
    let root = policy.resolve("")?;
    let path = policy.resolve(required_str(args, "path")?)?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| io_failure(e, &path, &root))?;
    let text = String::from_utf8(bytes).map_err(|_| {
        ToolFailure::new(
            FailureKind::ExecutionFailed,
            format!("{} is not valid UTF-8 text", display_path(&path, &root)),
        )
    })?;

    let offset = args.u64("offset").unwrap_or(0) as usize;
    let limit = args.u64("limit").map(|n| n as usize);
    if offset == 0 && limit.is_none() {
        return Ok(Payload::Text(text));
    }

    let lines = text.lines().skip(offset);
    let selected: Vec<&str> = match limit {
        Some(n) => lines.take(n).collect(),
        None => lines.collect(),
    };
    Ok(Payload::Text(selected.join("\n")))
}

fn io_failure(e: std::io::Error, path: &Path, root: &Path) -> ToolFailure {
    let shown = display_path(path, root);
    let message = match e.kind() {
        ErrorKind::NotFound => format!("no such file or directory: {shown}"),
        ErrorKind::PermissionDenied => format!("permission denied: {shown}"),
        _ => format!("{shown}: {e}"),
    };
    ToolFailure::new(FailureKind::ExecutionFailed, message)
}
