//! Orchestrator configuration.
//!
//! Loaded from TOML by the binary and handed to
//! [`Orchestrator::new`](crate::Orchestrator::new) as a value.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cache::CacheConfig;
use mcp::ServerConfig;
use policy::Policy;
use serde::{Deserialize, Serialize};

use crate::builtin::BuiltinKind;
use crate::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound on declarations returned for one prompt.
    pub max_function_declarations: usize,
    pub timeouts: TimeoutConfig,
    pub respawn: RespawnConfig,
    pub cache: CacheConfig,
    pub builtins: BuiltinConfig,
    /// External tool processes.
    pub tools: Vec<ToolConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_function_declarations: 16,
            timeouts: TimeoutConfig::default(),
            respawn: RespawnConfig::default(),
            cache: CacheConfig::default(),
            builtins: BuiltinConfig::default(),
            tools: Vec::new(),
        }
    }
}

/// Timeouts in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Spawn plus handshake.
    pub init: u64,
    /// One `tools/call` round trip.
    pub call: u64,
    /// Ceiling for built-in operations, including `run_command`.
    pub builtin: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            init: 15,
            call: 30,
            builtin: 120,
        }
    }
}

impl TimeoutConfig {
    pub fn init(&self) -> Duration {
        Duration::from_secs(self.init)
    }

    pub fn call(&self) -> Duration {
        Duration::from_secs(self.call)
    }

    pub fn builtin(&self) -> Duration {
        Duration::from_secs(self.builtin)
    }
}

/// How hard the registry tries to bring a tool process up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RespawnConfig {
    /// Extra spawn attempts after the first failure.
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RespawnConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff_ms: 250,
        }
    }
}

impl RespawnConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Built-in tool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuiltinConfig {
    /// Every built-in path is confined to this directory.
    pub root: PathBuf,
    pub enabled: Vec<BuiltinKind>,
    /// Allowlist for `run_command`.
    pub allowed_commands: Vec<String>,
}

impl Default for BuiltinConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            enabled: BuiltinKind::ALL.to_vec(),
            allowed_commands: Vec::new(),
        }
    }
}

impl BuiltinConfig {
    pub fn policy(&self) -> Policy {
        Policy::new(self.root.clone()).with_commands(self.allowed_commands.iter().cloned())
    }
}

/// An external tool process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl ToolConfig {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            name: self.name.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            cwd: self.cwd.clone(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.max_function_declarations == 0 {
            return Err(Error::Config(
                "max_function_declarations must be at least 1".to_string(),
            ));
        }

        for (name, secs) in [
            ("init", self.timeouts.init),
            ("call", self.timeouts.call),
            ("builtin", self.timeouts.builtin),
        ] {
            if secs == 0 {
                return Err(Error::Config(format!("timeouts.{name} must be at least 1")));
            }
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(Error::Config("tool with empty name".to_string()));
            }
            if tool.command.trim().is_empty() {
                return Err(Error::Config(format!("tool '{}' has an empty command", tool.name)));
            }
            if BuiltinKind::from_name(&tool.name).is_some() {
                return Err(Error::Config(format!(
                    "tool '{}' collides with a built-in tool",
                    tool.name
                )));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(Error::Config(format!("duplicate tool '{}'", tool.name)));
            }
        }

        Ok(())
    }

    pub fn tool(&self, name: &str) -> Option<&ToolConfig> {
        self.tools.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.timeouts.builtin(), Duration::from_secs(120));
        assert_eq!(config.builtins.enabled, BuiltinKind::ALL.to_vec());
    }

    #[test]
    fn parse_full_config() {
        let config = Config::parse(
            r#"
            max_function_declarations = 4

            [timeouts]
            call = 5

            [respawn]
            max_retries = 3
            backoff_ms = 10

            [cache]
            enabled = false
            ttl_secs = 60

            [builtins]
            root = "/srv/work"
            enabled = ["filesystem", "git"]
            allowed_commands = ["ls", "cargo test"]

            [[tools]]
            name = "fetch"
            command = "uvx"
            args = ["mcp-server-fetch"]
            env = { FETCH_UA = "toolbridge" }
            "#,
        )
        .unwrap();

        assert_eq!(config.max_function_declarations, 4);
        assert_eq!(config.timeouts.call, 5);
        assert_eq!(config.timeouts.init, 15);
        assert_eq!(config.respawn.max_retries, 3);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.capacity, 256);
        assert_eq!(
            config.builtins.enabled,
            vec![BuiltinKind::Filesystem, BuiltinKind::Git]
        );

        let fetch = config.tool("fetch").unwrap();
        assert_eq!(fetch.args, vec!["mcp-server-fetch"]);
        assert_eq!(fetch.env.get("FETCH_UA").map(String::as_str), Some("toolbridge"));

        let policy = config.builtins.policy();
        assert!(policy.check_command("cargo test --all").is_allowed());
        assert!(!policy.check_command("cargo publish").is_allowed());
    }

    #[test]
    fn rejects_zero_declarations() {
        assert!(matches!(
            Config::parse("max_function_declarations = 0"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn rejects_zero_timeouts() {
        for key in ["init", "call", "builtin"] {
            let toml = format!("[timeouts]\n{key} = 0");
            match Config::parse(&toml) {
                Err(Error::Config(msg)) => assert!(msg.contains(key), "{msg}"),
                other => panic!("expected config error for {key}, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_empty_command() {
        let toml = r#"
            [[tools]]
            name = "broken"
            command = "  "
        "#;
        assert!(matches!(Config::parse(toml), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_duplicate_tools() {
        let toml = r#"
            [[tools]]
            name = "fetch"
            command = "a"

            [[tools]]
            name = "fetch"
            command = "b"
        "#;
        assert!(matches!(Config::parse(toml), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_builtin_name_collision() {
        let toml = r#"
            [[tools]]
            name = "git"
            command = "git-mcp"
        "#;
        assert!(matches!(Config::parse(toml), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_unknown_builtin() {
        let toml = r#"
            [builtins]
            enabled = ["teleport"]
        "#;
        assert!(matches!(Config::parse(toml), Err(Error::Parse(_))));
    }
}
