//! Policy error types.

use std::path::PathBuf;
use thiserror::Error;

/// Policy errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested path resolves outside the permitted root.
    #[error("path '{path}' escapes root {}", root.display())]
    PathEscape { root: PathBuf, path: String },

    /// The configured root does not exist or cannot be canonicalized.
    #[error("invalid root {}: {source}", path.display())]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A command was rejected by the allowlist.
    #[error("command denied: {0}")]
    Denied(String),

    /// An I/O error occurred while inspecting a path.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
