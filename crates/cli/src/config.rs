//! Configuration loading from toolbridge.toml.

use std::path::Path;

use runtime::Config;

use crate::error::{Error, Result};

/// Read when no `--config` is given.
pub const DEFAULT_CONFIG: &str = "toolbridge.toml";

/// Load the explicit config file, or `toolbridge.toml` in the working
/// directory. Without either, built-ins run with default settings.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    load_from(explicit, Path::new(DEFAULT_CONFIG))
}

fn load_from(explicit: Option<&Path>, default: &Path) -> Result<Config> {
    match explicit {
        Some(path) if !path.exists() => Err(Error::ConfigNotFound {
            path: path.to_path_buf(),
        }),
        Some(path) => Ok(Config::load(path)?),
        None if default.exists() => Ok(Config::load(default)?),
        None => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_default_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(None, &dir.path().join(DEFAULT_CONFIG)).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.tools.is_empty());
    }

    #[test]
    fn default_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG);
        fs::write(
            &path,
            r#"
max_function_declarations = 4

[[tools]]
name = "fetch"
command = "uvx"
args = ["mcp-server-fetch"]
"#,
        )
        .unwrap();

        let config = load_from(None, &path).unwrap();
        assert_eq!(config.max_function_declarations, 4);
        assert_eq!(config.tools[0].name, "fetch");
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load_from(Some(&missing), &missing).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "max_function_declarations = 0\n").unwrap();
        let err = load_from(Some(&path), &path).unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }

    #[test]
    fn unreadable_config_surfaces_as_runtime_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from(Some(dir.path()), dir.path()).unwrap_err();
        assert!(matches!(err, Error::Runtime(runtime::Error::Io(_))), "{err:?}");
    }
}
