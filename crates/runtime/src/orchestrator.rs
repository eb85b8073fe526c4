//! Tool orchestrator: the entry point for declarations and invocations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use cache::{OutputCache, Payload};
use mcp::{CallToolResult, Tool};
use policy::Policy;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::builtin::{self, BuiltinKind};
use crate::config::{Config, ToolConfig};
use crate::registry::ProcessRegistry;
use crate::result::{FailureKind, Invocation, InvocationState, ToolFailure, ToolResult};
use crate::schema::{FunctionDeclaration, ToolCallArgs, coerce, to_declaration};
use crate::selector::{CatalogEntry, select};
use crate::Result;

/// Counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_entries: usize,
    pub bytes_saved: u64,
    pub tokens_saved: u64,
    pub external_calls: u64,
    pub processes_spawned: u64,
}

struct Settings {
    config: Config,
    policy: Policy,
}

/// Routes tool calls to built-ins or external tool processes.
///
/// [`invoke`](Self::invoke) never returns an error: every failure comes back
/// as a [`ToolResult`] with a [`FailureKind`]. Successful output passes
/// through the output optimizer; cacheable calls are memoized.
pub struct Orchestrator {
    settings: RwLock<Arc<Settings>>,
    registry: ProcessRegistry,
    cache: OutputCache,
    /// Functions advertised by each external tool, once known.
    functions: RwLock<HashMap<String, Vec<Tool>>>,
    external_calls: AtomicU64,
}

impl Orchestrator {
    /// Build an orchestrator. No process is started until a tool is used
    /// or [`warm_up`](Self::warm_up) is called.
    ///
    /// Init timeout, respawn policy and cache settings are fixed here;
    /// [`reload`](Self::reload) replaces the rest.
    pub fn new(config: Config) -> Result<Self> {
        let settings = Settings::new(config)?;
        let registry = ProcessRegistry::new(
            settings.config.tools.iter().map(ToolConfig::server_config),
            settings.config.timeouts.init(),
            settings.config.respawn,
        );
        let cache = OutputCache::new(settings.config.cache.clone());

        Ok(Self {
            settings: RwLock::new(Arc::new(settings)),
            registry,
            cache,
            functions: RwLock::new(HashMap::new()),
            external_calls: AtomicU64::new(0),
        })
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &OutputCache {
        &self.cache
    }

    /// Declarations relevant to `prompt`, at most `max_function_declarations`.
    ///
    /// External tools whose functions are not known yet are started when
    /// the prompt names them, so their functions can be offered.
    pub async fn available_declarations(&self, prompt: &str) -> Vec<FunctionDeclaration> {
        let settings = self.settings();
        let lowered = prompt.to_lowercase();

        for tool in &settings.config.tools {
            if self.known_functions(&tool.name).is_none()
                && lowered.contains(&tool.name.to_lowercase())
            {
                if let Err(failure) = self.fetch_functions(&tool.name).await {
                    warn!(tool = %tool.name, "could not list functions: {failure}");
                }
            }
        }

        select(
            prompt,
            &self.catalog_for(&settings),
            settings.config.max_function_declarations,
        )
    }

    /// Invoke `function` of `tool` with model-produced `args`.
    pub async fn invoke(&self, tool: &str, function: &str, args: Value) -> ToolResult {
        let invocation = Invocation::new(tool, function);
        debug!(invocation = %invocation.id(), tool, function, "invoking tool");

        let settings = self.settings();
        let result = if let Some(kind) = settings.builtin(tool) {
            self.invoke_builtin(invocation, kind, args, &settings).await
        } else if self.registry.is_configured(tool) {
            self.invoke_external(invocation, args, &settings).await
        } else {
            invocation.fail(ToolFailure::new(
                FailureKind::UnknownTool,
                format!("unknown tool: {tool}"),
            ))
        };

        match result.failure() {
            Some(failure) => warn!(
                invocation = %result.invocation_id,
                tool,
                function,
                kind = %failure.kind,
                "tool call failed: {}",
                failure.message
            ),
            None => debug!(
                invocation = %result.invocation_id,
                from_cache = result.from_cache,
                "tool call succeeded"
            ),
        }
        result
    }

    async fn invoke_builtin(
        &self,
        invocation: Invocation,
        kind: BuiltinKind,
        args: Value,
        settings: &Settings,
    ) -> ToolResult {
        let Some(function) = kind.function(invocation.function()) else {
            let message = format!("{kind} has no function '{}'", invocation.function());
            return invocation.fail(ToolFailure::new(FailureKind::UnknownTool, message));
        };
        let args = match coerce(args, &function.input_schema()) {
            Ok(args) => args,
            Err(e) => return invocation.fail(e.into()),
        };

        let call = builtin::execute(
            kind,
            function.name,
            &args,
            &settings.policy,
            settings.config.timeouts.builtin(),
        );
        self.run(invocation, function.read_only, &args, call).await
    }

    async fn invoke_external(
        &self,
        invocation: Invocation,
        args: Value,
        settings: &Settings,
    ) -> ToolResult {
        let tool = invocation.tool().to_string();
        let function = invocation.function().to_string();

        let schema = match self.input_schema(&tool, &function).await {
            Ok(Some(schema)) => schema,
            Ok(None) => {
                let message = format!("{tool} has no function '{function}'");
                return invocation.fail(ToolFailure::new(FailureKind::UnknownTool, message));
            }
            Err(failure) => return invocation.fail(failure),
        };
        let args = match coerce(args, &schema) {
            Ok(args) => args,
            Err(e) => return invocation.fail(e.into()),
        };

        let call = self.call_external(&tool, &function, &args, settings);
        self.run(invocation, true, &args, call).await
    }

    /// Cache lookup, execution, optimization and storage shared by every
    /// kind of tool.
    async fn run(
        &self,
        mut invocation: Invocation,
        cacheable: bool,
        args: &ToolCallArgs,
        call: impl Future<Output = std::result::Result<Payload, ToolFailure>>,
    ) -> ToolResult {
        let key = format!("{}.{}", invocation.tool(), invocation.function());
        let args = args.to_value();

        if cacheable {
            if let Some(entry) = self.cache.lookup(&key, &args) {
                invocation.advance(InvocationState::CacheHit);
                return invocation.succeed(entry.payload.clone());
            }
        }

        invocation.advance(InvocationState::Executing);
        match call.await {
            Ok(raw) if cacheable => {
                let entry = self.cache.store(&key, &args, raw);
                invocation.succeed(entry.payload.clone())
            }
            Ok(raw) => invocation.succeed(self.cache.optimize(raw)),
            Err(failure) => invocation.fail(failure),
        }
    }

    async fn call_external(
        &self,
        tool: &str,
        function: &str,
        args: &ToolCallArgs,
        settings: &Settings,
    ) -> std::result::Result<Payload, ToolFailure> {
        let handle = self.registry.acquire(tool).await?;
        self.remember_functions(tool, handle.tools());
        self.external_calls.fetch_add(1, Ordering::Relaxed);

        match handle
            .call_tool(function, args.to_value(), settings.config.timeouts.call())
            .await
        {
            Ok(result) => {
                self.registry.release(handle);
                Ok(payload_from(result))
            }
            Err(e) => {
                // Only a broken stream is rebuilt. Timeouts and unparsable
                // result bodies leave the process registered.
                if matches!(e, mcp::Error::Protocol(_)) {
                    self.registry.discard(&handle).await;
                }
                Err(e.into())
            }
        }
    }

    /// Input schema of an external function, starting the tool if its
    /// functions are not known yet.
    async fn input_schema(
        &self,
        tool: &str,
        function: &str,
    ) -> std::result::Result<Option<Value>, ToolFailure> {
        let tools = match self.known_functions(tool) {
            Some(tools) => tools,
            None => self.fetch_functions(tool).await?,
        };
        Ok(tools
            .into_iter()
            .find(|t| t.name == function)
            .map(|t| t.input_schema))
    }

    async fn fetch_functions(&self, tool: &str) -> std::result::Result<Vec<Tool>, ToolFailure> {
        let handle = self.registry.acquire(tool).await?;
        let tools = handle.tools().to_vec();
        self.remember_functions(tool, &tools);
        Ok(tools)
    }

    fn known_functions(&self, tool: &str) -> Option<Vec<Tool>> {
        read(&self.functions).get(tool).cloned()
    }

    fn remember_functions(&self, tool: &str, tools: &[Tool]) {
        write(&self.functions).insert(tool.to_string(), tools.to_vec());
    }

    /// Start every external tool and record its functions.
    ///
    /// Returns the number of functions per tool, or why it failed to start.
    pub async fn warm_up(&self) -> Vec<(String, std::result::Result<usize, ToolFailure>)> {
        let settings = self.settings();
        let mut report = Vec::new();
        for tool in &settings.config.tools {
            let outcome = self.fetch_functions(&tool.name).await.map(|t| t.len());
            match &outcome {
                Ok(count) => info!(tool = %tool.name, functions = count, "tool ready"),
                Err(failure) => warn!(tool = %tool.name, "tool failed to start: {failure}"),
            }
            report.push((tool.name.clone(), outcome));
        }
        report
    }

    /// Every tool with the declarations known so far, in offer order:
    /// enabled built-ins first, then external tools in config order.
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.catalog_for(&self.settings())
    }

    fn catalog_for(&self, settings: &Settings) -> Vec<CatalogEntry> {
        let builtins = settings.config.builtins.enabled.iter().map(|kind| CatalogEntry {
            tool: kind.name().to_string(),
            declarations: kind.declarations(),
        });

        let functions = read(&self.functions);
        let external = settings.config.tools.iter().map(|tool| CatalogEntry {
            tool: tool.name.clone(),
            declarations: functions
                .get(&tool.name)
                .map(|tools| tools.iter().map(declaration_for).collect())
                .unwrap_or_default(),
        });

        builtins.chain(external).collect()
    }

    /// The tool that offers `function`, for callers that only know the
    /// function name. The first tool in catalog order wins.
    pub fn function_owner(&self, function: &str) -> Option<String> {
        self.catalog()
            .into_iter()
            .find(|entry| entry.declarations.iter().any(|d| d.name == function))
            .map(|entry| entry.tool)
    }

    /// Swap in a new configuration.
    ///
    /// Processes of tools that changed or were removed are stopped and the
    /// cache is cleared.
    pub async fn reload(&self, config: Config) -> Result<()> {
        let settings = Settings::new(config)?;
        let stale = self
            .registry
            .reconfigure(settings.config.tools.iter().map(ToolConfig::server_config))
            .await;

        {
            let mut functions = write(&self.functions);
            for tool in &stale {
                functions.remove(tool);
            }
        }
        self.cache.clear();
        *write(&self.settings) = Arc::new(settings);

        info!(stopped = stale.len(), "configuration reloaded");
        Ok(())
    }

    pub fn stats(&self) -> Stats {
        let cache = self.cache.stats();
        Stats {
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            cache_entries: cache.entries,
            bytes_saved: cache.bytes_saved,
            tokens_saved: cache.tokens_saved,
            external_calls: self.external_calls.load(Ordering::Relaxed),
            processes_spawned: self.registry.processes_spawned(),
        }
    }

    /// Stop every tool process.
    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }

    fn settings(&self) -> Arc<Settings> {
        read(&self.settings).clone()
    }
}

impl Settings {
    fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let policy = config.builtins.policy();
        // Fail on a missing root now rather than on every call.
        policy.resolve("")?;
        Ok(Self { config, policy })
    }

    fn builtin(&self, tool: &str) -> Option<BuiltinKind> {
        BuiltinKind::from_name(tool).filter(|kind| self.config.builtins.enabled.contains(kind))
    }
}

fn declaration_for(tool: &Tool) -> FunctionDeclaration {
    to_declaration(
        &tool.name,
        tool.description.as_deref().unwrap_or_default(),
        &tool.input_schema,
    )
}

fn payload_from(result: CallToolResult) -> Payload {
    if let Some(structured) = result.structured_content {
        return Payload::Structured(structured);
    }
    if result.is_text_only() {
        return Payload::Text(result.text());
    }
    match serde_json::to_value(&result.content) {
        Ok(value) => Payload::Structured(value),
        Err(_) => Payload::Text(result.text()),
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuiltinConfig, RespawnConfig, TimeoutConfig};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn answer() -> u32 { 42 }\n").unwrap();
        dir
    }

    fn config(root: &std::path::Path) -> Config {
        Config {
            builtins: BuiltinConfig {
                root: root.to_path_buf(),
                allowed_commands: vec!["echo".to_string()],
                ..BuiltinConfig::default()
            },
            timeouts: TimeoutConfig {
                init: 5,
                call: 1,
                builtin: 10,
            },
            respawn: RespawnConfig {
                max_retries: 0,
                backoff_ms: 10,
            },
            ..Config::default()
        }
    }

    #[test]
    fn missing_root_is_a_config_error() {
        let dir = workspace();
        let gone = dir.path().join("gone");
        assert!(Orchestrator::new(config(&gone)).is_err());
    }

    #[tokio::test]
    async fn read_only_builtin_is_cached() {
        let dir = workspace();
        let orch = Orchestrator::new(config(dir.path())).unwrap();

        let first = orch
            .invoke("filesystem", "read_file", json!({"path": "src/lib.rs"}))
            .await;
        assert!(first.is_success(), "{first:?}");
        assert!(!first.from_cache);

        let second = orch
            .invoke("filesystem", "read_file", json!({"path": " src/lib.rs "}))
            .await;
        assert!(second.from_cache);
        assert_eq!(first.output(), second.output());
        assert_ne!(first.invocation_id, second.invocation_id);

        let stats = orch.stats();
        assert_eq!((stats.cache_hits, stats.cache_misses), (1, 1));
        assert_eq!(stats.external_calls, 0);
    }

    #[tokio::test]
    async fn interior_whitespace_reaches_distinct_files() {
        let dir = workspace();
        fs::write(dir.path().join("a b.txt"), "ONE SPACE").unwrap();
        fs::write(dir.path().join("a  b.txt"), "TWO SPACES").unwrap();
        let orch = Orchestrator::new(config(dir.path())).unwrap();

        let one = orch
            .invoke("filesystem", "read_file", json!({"path": "a b.txt"}))
            .await;
        let two = orch
            .invoke("filesystem", "read_file", json!({"path": "a  b.txt"}))
            .await;

        assert!(!two.from_cache);
        let text = |r: &ToolResult| r.output().map(Payload::to_text).unwrap_or_default();
        assert!(text(&one).contains("ONE SPACE"), "{one:?}");
        assert!(text(&two).contains("TWO SPACES"), "{two:?}");
    }

    #[tokio::test]
    async fn padded_path_is_read_uncached() {
        let dir = workspace();
        let orch = Orchestrator::new(config(dir.path())).unwrap();

        let result = orch
            .invoke("filesystem", "read_file", json!({"path": "  src/lib.rs\n"}))
            .await;
        assert!(result.is_success(), "{result:?}");
        assert!(!result.from_cache);
    }

    #[tokio::test]
    async fn path_escape_is_a_structured_failure() {
        let dir = workspace();
        let orch = Orchestrator::new(config(dir.path())).unwrap();

        let result = orch
            .invoke("filesystem", "read_file", json!({"path": "../../etc/passwd"}))
            .await;
        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::PathEscape);
        assert!(!failure.retryable);
    }

    #[tokio::test]
    async fn unknown_tool_and_function() {
        let dir = workspace();
        let orch = Orchestrator::new(config(dir.path())).unwrap();

        let result = orch.invoke("teleport", "go", json!({})).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::UnknownTool));

        let result = orch.invoke("git", "git_push", json!({})).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::UnknownTool));
    }

    #[tokio::test]
    async fn disabled_builtin_is_unknown() {
        let dir = workspace();
        let mut config = config(dir.path());
        config.builtins.enabled = vec![BuiltinKind::Filesystem];
        let orch = Orchestrator::new(config).unwrap();

        let result = orch.invoke("shell", "run_command", json!({"command": "echo hi"})).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::UnknownTool));
        assert!(orch.available_declarations("use the shell").await.is_empty());
    }

    #[tokio::test]
    async fn schema_mismatch_is_reported() {
        let dir = workspace();
        let orch = Orchestrator::new(config(dir.path())).unwrap();

        let result = orch.invoke("filesystem", "read_file", json!("src/lib.rs")).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::SchemaMismatch));

        let result = orch.invoke("filesystem", "read_file", json!({})).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::SchemaMismatch));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_command_is_never_cached() {
        let dir = workspace();
        let orch = Orchestrator::new(config(dir.path())).unwrap();

        for _ in 0..2 {
            let result = orch
                .invoke("shell", "run_command", json!({"command": "echo hi"}))
                .await;
            assert!(result.is_success());
            assert!(!result.from_cache);
        }
        assert_eq!(orch.stats().cache_entries, 0);

        let denied = orch
            .invoke("shell", "run_command", json!({"command": "rm -rf src"}))
            .await;
        assert_eq!(denied.failure_kind(), Some(FailureKind::CommandDenied));
        assert!(dir.path().join("src/lib.rs").exists());
    }

    #[tokio::test]
    async fn builtin_declarations_follow_the_prompt() {
        let dir = workspace();
        let orch = Orchestrator::new(config(dir.path())).unwrap();

        let names: Vec<_> = orch
            .available_declarations("what changed in git lately?")
            .await
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["git_status", "git_log", "git_diff"]);

        assert!(orch.available_declarations("tell me a joke").await.is_empty());
        assert_eq!(orch.function_owner("read_file").as_deref(), Some("filesystem"));
        assert_eq!(orch.function_owner("nope"), None);
    }

    #[tokio::test]
    async fn declarations_are_capped() {
        let dir = workspace();
        let mut config = config(dir.path());
        config.max_function_declarations = 2;
        let orch = Orchestrator::new(config).unwrap();

        let decls = orch
            .available_declarations("filesystem and git and shell")
            .await;
        let names: Vec<_> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["list_files", "read_file"]);
    }

    #[cfg(unix)]
    mod external {
        use super::*;
        use crate::registry::tests::{count_lines, fake_tool};

        struct Fixture {
            dir: TempDir,
            orch: Orchestrator,
        }

        impl Fixture {
            fn new() -> Self {
                let dir = workspace();
                let server = fake_tool("fake", dir.path());
                let mut config = config(dir.path());
                config.tools.push(ToolConfig {
                    name: server.name,
                    command: server.command,
                    args: server.args,
                    env: server.env,
                    cwd: None,
                });
                let orch = Orchestrator::new(config).unwrap();
                Self { dir, orch }
            }

            fn calls(&self) -> usize {
                count_lines(&self.dir.path().join("fake.calls"))
            }
        }

        #[tokio::test]
        async fn external_call_is_coerced_and_cached() {
            let fx = Fixture::new();

            let first = fx
                .orch
                .invoke("fake", "echo", json!({"message": "hi", "times": "3"}))
                .await;
            assert_eq!(first.output(), Some(&Payload::Text("echoed".to_string())));
            assert!(!first.from_cache);

            let second = fx
                .orch
                .invoke("fake", "echo", json!({"times": 3, "message": "hi"}))
                .await;
            assert!(second.from_cache);
            assert_eq!(first.output(), second.output());

            assert_eq!(fx.calls(), 1);
            let stats = fx.orch.stats();
            assert_eq!(stats.external_calls, 1);
            assert_eq!(stats.processes_spawned, 1);

            fx.orch.shutdown().await;
        }

        #[tokio::test]
        async fn tool_error_is_not_cached() {
            let fx = Fixture::new();

            for _ in 0..2 {
                let result = fx.orch.invoke("fake", "fail", json!({})).await;
                let failure = result.failure().unwrap();
                assert_eq!(failure.kind, FailureKind::ExecutionFailed);
                assert!(failure.message.contains("it broke"));
            }
            assert_eq!(fx.calls(), 2);

            fx.orch.shutdown().await;
        }

        #[tokio::test]
        async fn timed_out_process_stays_registered() {
            let fx = Fixture::new();
            fx.orch.registry().acquire("fake").await.unwrap();

            let started = std::time::Instant::now();
            let result = fx.orch.invoke("fake", "slow", json!({})).await;
            let elapsed = started.elapsed();
            let failure = result.failure().unwrap();
            assert_eq!(failure.kind, FailureKind::Timeout);
            assert!(failure.retryable);
            // Bounded by the 1s call timeout, not by the tool.
            assert!(elapsed >= std::time::Duration::from_millis(900), "{elapsed:?}");
            assert!(elapsed < std::time::Duration::from_secs(3), "{elapsed:?}");

            let handle = fx.orch.registry().current("fake").await.unwrap();
            assert!(handle.is_healthy().await);
            assert_eq!(handle.transport().pending_count(), 0);

            let result = fx.orch.invoke("fake", "echo", json!({"message": "again"})).await;
            assert!(result.is_success(), "{result:?}");
            assert_eq!(fx.orch.stats().processes_spawned, 1);

            fx.orch.shutdown().await;
        }

        #[tokio::test]
        async fn protocol_error_discards_the_process() {
            let fx = Fixture::new();

            let result = fx.orch.invoke("fake", "garble", json!({})).await;
            assert_eq!(result.failure_kind(), Some(FailureKind::ProtocolError));
            assert!(fx.orch.registry().current("fake").await.is_none());

            let result = fx.orch.invoke("fake", "echo", json!({"message": "fresh"})).await;
            assert!(result.is_success(), "{result:?}");
            assert_eq!(fx.orch.stats().processes_spawned, 2);

            fx.orch.shutdown().await;
        }

        #[tokio::test]
        async fn unknown_external_function_and_bad_arguments() {
            let fx = Fixture::new();

            let result = fx.orch.invoke("fake", "nope", json!({})).await;
            assert_eq!(result.failure_kind(), Some(FailureKind::UnknownTool));

            let result = fx.orch.invoke("fake", "echo", json!({"times": "many"})).await;
            assert_eq!(result.failure_kind(), Some(FailureKind::SchemaMismatch));
            assert_eq!(fx.calls(), 0);

            fx.orch.shutdown().await;
        }

        #[tokio::test]
        async fn concurrent_invocations_share_one_process() {
            let fx = Arc::new(Fixture::new());

            let tasks: Vec<_> = (0..6)
                .map(|i| {
                    let fx = fx.clone();
                    tokio::spawn(async move {
                        fx.orch
                            .invoke("fake", "echo", json!({"message": format!("m{i}")}))
                            .await
                    })
                })
                .collect();
            for task in tasks {
                assert!(task.await.unwrap().is_success());
            }

            assert_eq!(fx.orch.stats().processes_spawned, 1);
            assert_eq!(fx.calls(), 6);

            fx.orch.shutdown().await;
        }

        #[tokio::test]
        async fn naming_a_tool_fetches_its_declarations() {
            let fx = Fixture::new();
            assert_eq!(fx.orch.function_owner("echo"), None);

            let names: Vec<_> = fx
                .orch
                .available_declarations("ask the fake server")
                .await
                .into_iter()
                .map(|d| d.name)
                .collect();
            assert_eq!(names, ["echo", "slow", "fail", "garble"]);
            assert_eq!(fx.orch.function_owner("echo").as_deref(), Some("fake"));

            fx.orch.shutdown().await;
        }

        #[tokio::test]
        async fn warm_up_reports_each_tool() {
            let fx = Fixture::new();
            let report = fx.orch.warm_up().await;
            assert_eq!(report.len(), 1);
            assert_eq!(report[0].0, "fake");
            assert_eq!(report[0].1.as_ref().ok(), Some(&4));

            fx.orch.shutdown().await;
        }

        #[tokio::test]
        async fn reload_stops_removed_tools() {
            let fx = Fixture::new();
            assert!(fx.orch.invoke("fake", "echo", json!({"message": "x"})).await.is_success());
            let handle = fx.orch.registry().current("fake").await.unwrap();

            fx.orch.reload(config(fx.dir.path())).await.unwrap();

            assert!(!handle.transport().is_open());
            assert_eq!(fx.orch.stats().cache_entries, 0);
            let result = fx.orch.invoke("fake", "echo", json!({"message": "x"})).await;
            assert_eq!(result.failure_kind(), Some(FailureKind::UnknownTool));
        }

        #[tokio::test]
        async fn missing_binary_is_tool_unavailable() {
            let dir = workspace();
            let mut config = config(dir.path());
            config.tools.push(ToolConfig {
                name: "ghost".to_string(),
                command: "/nonexistent/tool-binary".to_string(),
                args: Vec::new(),
                env: HashMap::new(),
                cwd: None,
            });
            let orch = Orchestrator::new(config).unwrap();

            let result = orch.invoke("ghost", "anything", json!({})).await;
            let failure = result.failure().unwrap();
            assert_eq!(failure.kind, FailureKind::ToolUnavailable);
            assert!(failure.retryable);
        }
    }
}
