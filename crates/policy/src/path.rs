//! Path confinement.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// Resolve `user_path` against `root` and confine the result to `root`.
///
/// The path is joined onto the canonical root and walked one component at a
/// time: existing prefixes are canonicalized (so symlinks and `..` are
/// resolved against the real filesystem), and once a component does not
/// exist the remainder is applied lexically. The result must lie at or
/// beneath the canonical root, otherwise the call fails with
/// [`Error::PathEscape`]. Nothing on disk is modified.
///
/// Resolution is idempotent: resolving an already-resolved path returns it
/// unchanged.
pub fn resolve(root: &Path, user_path: &str) -> Result<PathBuf> {
    let root = fs::canonicalize(root).map_err(|source| Error::InvalidRoot {
        path: root.to_path_buf(),
        source,
    })?;

    let escape = || Error::PathEscape {
        root: root.clone(),
        path: user_path.to_string(),
    };

    let candidate = root.join(user_path);
    let mut resolved = PathBuf::new();
    // Trailing components of `resolved` that do not exist on disk.
    let mut missing = 0usize;

    for component in candidate.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(escape());
                }
                missing = missing.saturating_sub(1);
            }
            Component::Normal(name) => {
                resolved.push(name);
                if missing > 0 {
                    missing += 1;
                    continue;
                }
                match fs::canonicalize(&resolved) {
                    Ok(real) => resolved = real,
                    Err(e) if e.kind() == ErrorKind::NotFound => missing = 1,
                    Err(e) => return Err(Error::Io(e)),
                }
            }
        }
    }

    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(escape())
    }
}
