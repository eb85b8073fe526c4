//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A config file was named explicitly but does not exist.
    #[error("config file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// `--args` was not a JSON value.
    #[error("invalid --args: {0}")]
    InvalidArgs(serde_json::Error),

    /// An error occurred in the runtime layer.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// Output could not be serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
