#![deny(missing_docs)]
//! Tool registry for trident.
//!
//! Holds tools as `Arc<dyn Tool>` keyed by name, with registration-time
//! capability validation, cleanup-before-unregister, change listeners,
//! and discovery queries. The registry is readable concurrently;
//! mutations take the write lock.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use keel::{codes, AgentError, Tool};

/// Registration-time metadata, used by discovery and stats.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Rate-limit and stats category ("default", "system", "file").
    pub category: String,
    /// Free-form discovery tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Expected tool version. When set it must match the tool's own
    /// `version()` during validated registration.
    pub version: Option<String>,
}

impl ToolMetadata {
    /// Metadata with just a category.
    pub fn in_category(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            tags: vec![],
            version: None,
        }
    }
}

/// Options for [`ToolRegistry::register`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct RegisterOptions {
    /// Replace an existing tool with the same name instead of rejecting.
    pub replace_existing: bool,
    /// Validate the tool's declared capabilities before accepting it.
    pub validate: bool,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            replace_existing: false,
            validate: true,
        }
    }
}

/// A change notification delivered to registry listeners.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A tool was registered (or replaced).
    Registered {
        /// The tool's name.
        name: String,
    },
    /// A tool was removed.
    Unregistered {
        /// The tool's name.
        name: String,
    },
    /// The registry was emptied.
    Cleared,
}

/// Listener for registry change events. Delivery is best-effort: a
/// panicking listener is logged and skipped, never propagated.
pub type RegistryListener = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

/// Aggregate registry counts for the status surface.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Registered tools.
    pub total: usize,
    /// Tool counts per category.
    pub by_category: HashMap<String, usize>,
    /// Tools declaring `is_read_only`.
    pub read_only: usize,
    /// Tools declaring `is_concurrency_safe`.
    pub concurrency_safe: usize,
}

struct Entry {
    tool: Arc<dyn Tool>,
    metadata: ToolMetadata,
}

struct Inner {
    entries: HashMap<String, Entry>,
    listeners: Vec<RegistryListener>,
}

/// Registry of tools available to the runtime.
///
/// Tools register at startup and deregister through [`unregister`],
/// which runs the tool's `cleanup` first. A failing cleanup keeps the
/// entry in place so the resource is not leaked silently.
///
/// [`unregister`]: ToolRegistry::unregister
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                listeners: vec![],
            }),
        }
    }

    /// Register a tool.
    ///
    /// Rejects duplicates unless `options.replace_existing`; with
    /// `options.validate`, rejects tools whose declared capabilities are
    /// missing or inconsistent with the supplied metadata.
    pub async fn register(
        &self,
        tool: Arc<dyn Tool>,
        metadata: ToolMetadata,
        options: RegisterOptions,
    ) -> Result<(), AgentError> {
        if options.validate {
            validate_tool(tool.as_ref(), &metadata)?;
        }
        let name = tool.name().to_string();
        let mut inner = self.inner.write().await;
        if inner.entries.contains_key(&name) && !options.replace_existing {
            return Err(AgentError::validation(
                "DUPLICATE_TOOL",
                format!("tool already registered: {name}"),
            ));
        }
        inner.entries.insert(name.clone(), Entry { tool, metadata });
        info!(tool = %name, "tool registered");
        notify(&inner.listeners, &RegistryEvent::Registered { name });
        Ok(())
    }

    /// Remove a tool, running its `cleanup` first. When cleanup fails
    /// the entry is kept and the error is returned.
    pub async fn unregister(&self, name: &str) -> Result<(), AgentError> {
        let tool = {
            let inner = self.inner.read().await;
            let entry = inner.entries.get(name).ok_or_else(|| {
                AgentError::configuration(
                    codes::TOOL_NOT_FOUND,
                    format!("tool not registered: {name}"),
                )
            })?;
            Arc::clone(&entry.tool)
        };
        tool.cleanup().await?;

        let mut inner = self.inner.write().await;
        inner.entries.remove(name);
        info!(tool = %name, "tool unregistered");
        notify(
            &inner.listeners,
            &RegistryEvent::Unregistered {
                name: name.to_string(),
            },
        );
        Ok(())
    }

    /// Look up a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let inner = self.inner.read().await;
        inner.entries.get(name).map(|e| Arc::clone(&e.tool))
    }

    /// Whether a tool with this name is registered.
    pub async fn has(&self, name: &str) -> bool {
        self.inner.read().await.entries.contains_key(name)
    }

    /// Names of all registered tools, sorted.
    pub async fn names(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Case-insensitive match against name, description, and tags.
    pub async fn discover(&self, query: &str) -> Vec<String> {
        let needle = query.to_lowercase();
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner
            .entries
            .values()
            .filter(|e| {
                e.tool.name().to_lowercase().contains(&needle)
                    || e.tool.description().to_lowercase().contains(&needle)
                    || e.metadata
                        .tags
                        .iter()
                        .any(|t| t.to_lowercase().contains(&needle))
            })
            .map(|e| e.tool.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Names of tools registered under a category.
    pub async fn list_by_category(&self, category: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner
            .entries
            .values()
            .filter(|e| e.metadata.category == category)
            .map(|e| e.tool.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Names of tools carrying a tag.
    pub async fn list_by_tag(&self, tag: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner
            .entries
            .values()
            .filter(|e| e.metadata.tags.iter().any(|t| t == tag))
            .map(|e| e.tool.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// The category a tool was registered under, if any.
    pub async fn category_of(&self, name: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner.entries.get(name).map(|e| e.metadata.category.clone())
    }

    /// Aggregate counts.
    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        let mut stats = RegistryStats {
            total: inner.entries.len(),
            ..RegistryStats::default()
        };
        for entry in inner.entries.values() {
            *stats
                .by_category
                .entry(entry.metadata.category.clone())
                .or_insert(0) += 1;
            if entry.tool.is_read_only() {
                stats.read_only += 1;
            }
            if entry.tool.is_concurrency_safe() {
                stats.concurrency_safe += 1;
            }
        }
        stats
    }

    /// Remove every tool, attempting each tool's cleanup best-effort.
    /// Cleanup failures are logged; the registry empties regardless.
    pub async fn clear(&self) {
        let tools: Vec<Arc<dyn Tool>> = {
            let inner = self.inner.read().await;
            inner.entries.values().map(|e| Arc::clone(&e.tool)).collect()
        };
        for tool in tools {
            if let Err(e) = tool.cleanup().await {
                warn!(tool = tool.name(), error = %e, "tool cleanup failed during clear");
            }
        }
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        notify(&inner.listeners, &RegistryEvent::Cleared);
    }

    /// Subscribe to change events.
    pub async fn on_change(&self, listener: RegistryListener) {
        self.inner.write().await.listeners.push(listener);
    }

    /// Split the given tool names by concurrency safety: a set safe to
    /// run in parallel and a list (caller order preserved) that must run
    /// sequentially. Unknown names land in the sequential list so the
    /// executor reports them one at a time.
    pub async fn partition_by_concurrency(
        &self,
        names: &[String],
    ) -> (HashSet<String>, Vec<String>) {
        let inner = self.inner.read().await;
        let mut safe = HashSet::new();
        let mut sequential = Vec::new();
        for name in names {
            match inner.entries.get(name) {
                Some(e) if e.tool.is_concurrency_safe() => {
                    safe.insert(name.clone());
                }
                _ => sequential.push(name.clone()),
            }
        }
        (safe, sequential)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort listener dispatch. A panicking listener must not poison
/// registry state, so each call is isolated.
fn notify(listeners: &[RegistryListener], event: &RegistryEvent) {
    for listener in listeners {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
        if result.is_err() {
            warn!(?event, "registry listener panicked");
        }
    }
    debug!(?event, listeners = listeners.len(), "registry event delivered");
}

fn validate_tool(tool: &dyn Tool, metadata: &ToolMetadata) -> Result<(), AgentError> {
    if tool.name().trim().is_empty() {
        return Err(AgentError::validation(
            "INVALID_TOOL",
            "tool name must be non-empty",
        ));
    }
    if tool.version().trim().is_empty() {
        return Err(AgentError::validation(
            "INVALID_TOOL",
            format!("tool {} must declare a version", tool.name()),
        ));
    }
    if !tool.input_schema().is_object() {
        return Err(AgentError::validation(
            "INVALID_TOOL",
            format!("tool {} input schema must be a JSON object", tool.name()),
        ));
    }
    if let Some(expected) = &metadata.version {
        if expected != tool.version() {
            return Err(AgentError::validation(
                "INVALID_TOOL",
                format!(
                    "tool {} version {} does not match metadata version {expected}",
                    tool.name(),
                    tool.version()
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel::test_utils::{EchoTool, FailTool, SleepTool};
    use keel::{ToolContext, ToolFuture};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn opts() -> RegisterOptions {
        RegisterOptions::default()
    }

    #[tokio::test]
    async fn register_and_get() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool), ToolMetadata::in_category("default"), opts())
            .await
            .unwrap();
        assert!(reg.has("echo").await);
        assert!(reg.get("echo").await.is_some());
        assert!(reg.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn duplicate_rejected_unless_replacing() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool), ToolMetadata::default(), opts())
            .await
            .unwrap();
        let err = reg
            .register(Arc::new(EchoTool), ToolMetadata::default(), opts())
            .await
            .unwrap_err();
        assert_eq!(err.code, "DUPLICATE_TOOL");

        reg.register(
            Arc::new(EchoTool),
            ToolMetadata::default(),
            RegisterOptions {
                replace_existing: true,
                ..opts()
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn metadata_version_mismatch_rejected() {
        let reg = ToolRegistry::new();
        let err = reg
            .register(
                Arc::new(EchoTool),
                ToolMetadata {
                    version: Some("9.9.9".into()),
                    ..ToolMetadata::default()
                },
                opts(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, "INVALID_TOOL");
    }

    struct CleanupTool {
        fail: bool,
        cleaned: Arc<AtomicBool>,
    }

    impl Tool for CleanupTool {
        fn name(&self) -> &str {
            "cleanup"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn description(&self) -> &str {
            "Tracks cleanup"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn is_read_only(&self) -> bool {
            true
        }
        fn is_concurrency_safe(&self) -> bool {
            true
        }
        fn execute(
            &self,
            _ctx: ToolContext,
            input: serde_json::Value,
        ) -> ToolFuture<'_, serde_json::Value> {
            Box::pin(async move { Ok(input) })
        }
        fn check_permissions<'a>(
            &'a self,
            _ctx: &'a ToolContext,
            _input: &'a serde_json::Value,
        ) -> ToolFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }
        fn cleanup(&self) -> ToolFuture<'_, ()> {
            let fail = self.fail;
            let cleaned = Arc::clone(&self.cleaned);
            Box::pin(async move {
                if fail {
                    Err(AgentError::system("CLEANUP_FAILED", "no"))
                } else {
                    cleaned.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
        }
    }

    #[tokio::test]
    async fn unregister_runs_cleanup_first() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let reg = ToolRegistry::new();
        reg.register(
            Arc::new(CleanupTool {
                fail: false,
                cleaned: Arc::clone(&cleaned),
            }),
            ToolMetadata::default(),
            opts(),
        )
        .await
        .unwrap();
        reg.unregister("cleanup").await.unwrap();
        assert!(cleaned.load(Ordering::SeqCst));
        assert!(!reg.has("cleanup").await);
    }

    #[tokio::test]
    async fn failed_cleanup_keeps_entry() {
        let reg = ToolRegistry::new();
        reg.register(
            Arc::new(CleanupTool {
                fail: true,
                cleaned: Arc::new(AtomicBool::new(false)),
            }),
            ToolMetadata::default(),
            opts(),
        )
        .await
        .unwrap();
        assert!(reg.unregister("cleanup").await.is_err());
        assert!(reg.has("cleanup").await, "entry stays when cleanup fails");
    }

    #[tokio::test]
    async fn listener_panic_does_not_break_registration() {
        let reg = ToolRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        reg.on_change(Arc::new(|_| panic!("bad listener"))).await;
        let seen2 = Arc::clone(&seen);
        reg.on_change(Arc::new(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

        reg.register(Arc::new(EchoTool), ToolMetadata::default(), opts())
            .await
            .unwrap();
        assert!(reg.has("echo").await);
        assert_eq!(seen.load(Ordering::SeqCst), 1, "later listener still ran");
    }

    #[tokio::test]
    async fn discovery_and_categories() {
        let reg = ToolRegistry::new();
        reg.register(
            Arc::new(EchoTool),
            ToolMetadata {
                category: "default".into(),
                tags: vec!["text".into()],
                version: None,
            },
            opts(),
        )
        .await
        .unwrap();
        reg.register(
            Arc::new(FailTool),
            ToolMetadata {
                category: "system".into(),
                tags: vec!["chaos".into()],
                version: None,
            },
            opts(),
        )
        .await
        .unwrap();

        assert_eq!(reg.discover("echo").await, ["echo"]);
        assert_eq!(reg.discover("CHAOS").await, ["fail"]);
        assert_eq!(reg.list_by_category("system").await, ["fail"]);
        assert_eq!(reg.list_by_tag("text").await, ["echo"]);

        let stats = reg.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_category["default"], 1);
        assert_eq!(stats.read_only, 2);
    }

    #[tokio::test]
    async fn partition_by_concurrency_preserves_order() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool), ToolMetadata::default(), opts())
            .await
            .unwrap();
        reg.register(
            Arc::new(SleepTool {
                millis: 1,
                concurrency_safe: false,
            }),
            ToolMetadata::default(),
            opts(),
        )
        .await
        .unwrap();

        let names = vec![
            "sleep".to_string(),
            "echo".to_string(),
            "ghost".to_string(),
            "sleep".to_string(),
        ];
        let (safe, sequential) = reg.partition_by_concurrency(&names).await;
        assert!(safe.contains("echo"));
        assert_eq!(sequential, ["sleep", "ghost", "sleep"]);
    }
}
