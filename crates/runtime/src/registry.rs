//! Process registry for external tools.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use mcp::{ProcessHandle, ServerConfig};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::RespawnConfig;
use crate::{Error, Result};

/// One tool's handle. Locked across spawn so concurrent acquirers coalesce.
type Slot = Arc<Mutex<Option<Arc<ProcessHandle>>>>;

/// Owns at most one live process per configured tool.
///
/// Handles stay warm between calls. An unhealthy handle (exited process,
/// closed or broken transport) is replaced on the next [`acquire`].
///
/// [`acquire`]: ProcessRegistry::acquire
pub struct ProcessRegistry {
    configs: StdMutex<HashMap<String, ServerConfig>>,
    slots: StdMutex<HashMap<String, Slot>>,
    init_timeout: Duration,
    respawn: RespawnConfig,
    spawned: AtomicU64,
}

impl ProcessRegistry {
    pub fn new(
        configs: impl IntoIterator<Item = ServerConfig>,
        init_timeout: Duration,
        respawn: RespawnConfig,
    ) -> Self {
        Self {
            configs: StdMutex::new(configs.into_iter().map(|c| (c.name.clone(), c)).collect()),
            slots: StdMutex::new(HashMap::new()),
            init_timeout,
            respawn,
            spawned: AtomicU64::new(0),
        }
    }

    /// Names of all configured tools, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.configs).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_configured(&self, tool: &str) -> bool {
        lock(&self.configs).contains_key(tool)
    }

    /// Number of processes started successfully.
    pub fn processes_spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Get a live handle for `tool`, spawning it if needed.
    ///
    /// Fails with [`mcp::Error::Spawn`] when the process cannot be started
    /// and [`mcp::Error::Handshake`] when it does not initialize, after the
    /// configured retries.
    pub async fn acquire(&self, tool: &str) -> Result<Arc<ProcessHandle>> {
        if !self.is_configured(tool) {
            return Err(Error::UnknownTool(tool.to_string()));
        }
        let slot = self.slot(tool);
        let mut current = slot.lock().await;

        // Read under the slot lock so a concurrent reconfigure is either
        // fully before this spawn or stops what it starts.
        let config = lock(&self.configs)
            .get(tool)
            .cloned()
            .ok_or_else(|| Error::UnknownTool(tool.to_string()))?;

        if let Some(handle) = current.as_ref() {
            if handle.is_healthy().await {
                return Ok(handle.clone());
            }
            warn!(tool, pid = handle.pid(), "tool process unhealthy, replacing");
            handle.shutdown().await;
            *current = None;
        }

        let handle = self.spawn(config).await?;
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// Return a handle after use. Handles stay warm, so this does nothing.
    pub fn release(&self, _handle: Arc<ProcessHandle>) {}

    /// Drop `handle` if it is still the registered one for its tool.
    ///
    /// Used after a protocol error so the next acquire starts fresh. A
    /// handle that was already replaced is left alone.
    pub async fn discard(&self, handle: &Arc<ProcessHandle>) {
        let slot = self.slot(handle.name());
        let mut current = slot.lock().await;
        if current.as_ref().is_some_and(|h| Arc::ptr_eq(h, handle)) {
            warn!(tool = handle.name(), pid = handle.pid(), "discarding tool process");
            *current = None;
        }
        drop(current);
        handle.shutdown().await;
    }

    /// Terminate the process for `tool`, if any.
    ///
    /// The slot itself stays registered: an acquirer already waiting on it
    /// must not end up spawning beside a fresh slot.
    pub async fn shutdown(&self, tool: &str) {
        let slot = lock(&self.slots).get(tool).cloned();
        if let Some(slot) = slot {
            if let Some(handle) = slot.lock().await.take() {
                handle.shutdown().await;
            }
        }
    }

    /// Terminate every process.
    pub async fn shutdown_all(&self) {
        let slots: Vec<Slot> = lock(&self.slots).values().cloned().collect();
        for slot in slots {
            if let Some(handle) = slot.lock().await.take() {
                handle.shutdown().await;
            }
        }
    }

    /// Replace the tool configurations. Processes whose configuration
    /// changed or disappeared are shut down; returns their names.
    pub async fn reconfigure(
        &self,
        configs: impl IntoIterator<Item = ServerConfig>,
    ) -> Vec<String> {
        let next: HashMap<String, ServerConfig> =
            configs.into_iter().map(|c| (c.name.clone(), c)).collect();
        let stale: Vec<String> = {
            let mut current = lock(&self.configs);
            let stale = current
                .iter()
                .filter(|(name, config)| next.get(*name) != Some(*config))
                .map(|(name, _)| name.clone())
                .collect();
            *current = next;
            stale
        };

        for tool in &stale {
            self.shutdown(tool).await;
        }
        stale
    }

    /// Handle currently registered for `tool`, without spawning.
    pub async fn current(&self, tool: &str) -> Option<Arc<ProcessHandle>> {
        let slot = lock(&self.slots).get(tool).cloned()?;
        let current = slot.lock().await;
        current.clone()
    }

    fn slot(&self, tool: &str) -> Slot {
        lock(&self.slots).entry(tool.to_string()).or_default().clone()
    }

    async fn spawn(&self, config: ServerConfig) -> Result<Arc<ProcessHandle>> {
        let mut attempt = 0;
        loop {
            match ProcessHandle::start(config.clone(), self.init_timeout).await {
                Ok(handle) => {
                    self.spawned.fetch_add(1, Ordering::Relaxed);
                    return Ok(Arc::new(handle));
                }
                Err(e) if attempt < self.respawn.max_retries => {
                    attempt += 1;
                    warn!(
                        tool = %config.name,
                        attempt,
                        max_retries = self.respawn.max_retries,
                        "failed to start tool process: {e}; retrying"
                    );
                    tokio::time::sleep(self.respawn.backoff()).await;
                }
                Err(e) => {
                    info!(tool = %config.name, "giving up on tool process: {e}");
                    return Err(e.into());
                }
            }
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::path::Path;

    /// Tool server that appends a line to `$SPAWNS` when it starts and to
    /// `$CALLS` for every `tools/call`. Calls to `slow` are never answered.
    pub(crate) const FAKE_SERVER: &str = r#"
[ -n "$SPAWNS" ] && echo spawn >> "$SPAWNS"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\),.*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo a message","inputSchema":{"type":"object","properties":{"message":{"type":"string"},"times":{"type":"integer"}},"required":["message"]}},{"name":"slow","inputSchema":{"type":"object"}},{"name":"fail","inputSchema":{"type":"object"}},{"name":"garble","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      [ -n "$CALLS" ] && echo call >> "$CALLS"
      case "$line" in
        *'"name":"slow"'*) ;;
        *'"name":"fail"'*)
          printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"it broke"}],"isError":true}}\n' "$id" ;;
        *'"name":"garble"'*)
          echo 'this is not json' ;;
        *)
          printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"echoed"}]}}\n' "$id" ;;
      esac ;;
  esac
done
"#;

    pub(crate) fn fake_tool(name: &str, dir: &Path) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), FAKE_SERVER.to_string()],
            env: HashMap::from([
                (
                    "SPAWNS".to_string(),
                    dir.join(format!("{name}.spawns")).display().to_string(),
                ),
                (
                    "CALLS".to_string(),
                    dir.join(format!("{name}.calls")).display().to_string(),
                ),
            ]),
            cwd: None,
        }
    }

    pub(crate) fn count_lines(path: &Path) -> usize {
        std::fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    fn registry(configs: Vec<ServerConfig>) -> ProcessRegistry {
        ProcessRegistry::new(
            configs,
            Duration::from_secs(5),
            RespawnConfig {
                max_retries: 1,
                backoff_ms: 10,
            },
        )
    }

    #[tokio::test]
    async fn concurrent_acquires_spawn_one_process() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(registry(vec![fake_tool("fake", dir.path())]));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.acquire("fake").await.unwrap() })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.processes_spawned(), 1);
        assert_eq!(count_lines(&dir.path().join("fake.spawns")), 1);

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn healthy_handle_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(vec![fake_tool("fake", dir.path())]);

        let first = registry.acquire("fake").await.unwrap();
        registry.release(first.clone());
        let second = registry.acquire("fake").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.tools().len(), 4);

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn dead_handle_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(vec![fake_tool("fake", dir.path())]);

        let first = registry.acquire("fake").await.unwrap();
        first.shutdown().await;

        let second = registry.acquire("fake").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.processes_spawned(), 2);

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn discard_removes_only_the_registered_handle() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(vec![fake_tool("fake", dir.path())]);

        let handle = registry.acquire("fake").await.unwrap();
        registry.discard(&handle).await;
        assert!(registry.current("fake").await.is_none());
        assert!(!handle.transport().is_open());

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let registry = registry(Vec::new());
        assert!(matches!(
            registry.acquire("nope").await,
            Err(Error::UnknownTool(_))
        ));
    }

    #[tokio::test]
    async fn spawn_failure_is_retried_then_reported() {
        let config = ServerConfig {
            name: "ghost".to_string(),
            command: "/nonexistent/tool-binary".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        };
        let registry = registry(vec![config]);
        let err = registry.acquire("ghost").await.err();
        assert!(matches!(err, Some(Error::Mcp(mcp::Error::Spawn(_)))));
        assert_eq!(registry.processes_spawned(), 0);
    }

    #[tokio::test]
    async fn reconfigure_stops_changed_tools() {
        let dir = tempfile::tempdir().unwrap();
        let keep = fake_tool("keep", dir.path());
        let change = fake_tool("change", dir.path());
        let registry = registry(vec![keep.clone(), change.clone()]);

        let kept = registry.acquire("keep").await.unwrap();
        let changed = registry.acquire("change").await.unwrap();

        let mut changed_config = change;
        changed_config.env.insert("EXTRA".to_string(), "1".to_string());
        let stale = registry.reconfigure(vec![keep, changed_config]).await;

        assert_eq!(stale, vec!["change".to_string()]);
        assert!(kept.transport().is_open());
        assert!(!changed.transport().is_open());

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn reconfigure_during_acquire_leaves_one_process() {
        let dir = tempfile::tempdir().unwrap();
        let change = fake_tool("change", dir.path());
        let registry = Arc::new(registry(vec![change.clone()]));

        let mut changed_config = change;
        changed_config.env.insert("EXTRA".to_string(), "1".to_string());

        let acquirers: Vec<_> = (0..6)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.acquire("change").await.unwrap() })
            })
            .collect();
        let reloader = {
            let registry = registry.clone();
            let config = changed_config.clone();
            tokio::spawn(async move { registry.reconfigure(vec![config]).await })
        };

        let mut handles = Vec::new();
        for task in acquirers {
            handles.push(task.await.unwrap());
        }
        reloader.await.unwrap();

        let current = registry.acquire("change").await.unwrap();
        assert_eq!(current.config(), &changed_config);
        for handle in &handles {
            if handle.transport().is_open() {
                assert!(Arc::ptr_eq(handle, &current));
            }
        }
        let stopped: std::collections::HashSet<_> = handles
            .iter()
            .filter(|h| !h.transport().is_open())
            .map(Arc::as_ptr)
            .collect();
        assert_eq!(registry.processes_spawned() as usize - stopped.len(), 1);

        registry.shutdown_all().await;
    }
}
