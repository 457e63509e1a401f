//! Tool plugin registry and trait definitions
//!
//! Each built-in tool is a self-contained module in tools/. A handler never
//! returns an Err to the session loop: failures become a `ToolResult::Error`
//! rendered as an `Error: …` string the model can recover from.

use crate::context::ToolContext;
use agentmesh_llm::ToolSpec;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub enum ToolResult {
    Text(String),
    Json(Value),
    Error(String),
}

impl ToolResult {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn json(v: Value) -> Self {
        Self::Json(v)
    }

    pub fn error(s: impl Into<String>) -> Self {
        Self::Error(s.into())
    }

    pub fn to_content_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Json(v) => serde_json::to_string_pretty(v).unwrap_or_default(),
            Self::Error(e) => format!("Error: {}", e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// The plugin trait — implement this to add a new capability.
///
/// The kernel injects a fresh [`ToolContext`] per call; plugins never retain
/// it.
#[async_trait::async_trait]
pub trait ToolPlugin: Send + Sync {
    /// Unique tool name (e.g. "vfs_read", "spawn_agent").
    fn name(&self) -> &str;

    /// Human-readable description sent to the model.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn parameters(&self) -> Value;

    /// System prompt fragment for this tool, if any.
    fn prompt(&self) -> &str {
        ""
    }

    /// Execute the tool with the given arguments and context.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult;

    /// Execute with cancellation. Default races execute() against the token;
    /// tools doing network IO should honor the token themselves.
    async fn execute_cancellable(
        &self,
        args: Value,
        ctx: &ToolContext,
        cancel: CancellationToken,
    ) -> ToolResult {
        tokio::select! {
            result = self.execute(args, ctx) => result,
            _ = cancel.cancelled() => ToolResult::text("[cancelled]"),
        }
    }

    /// Provider-facing definition.
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters(),
        }
    }
}

/// Name -> plugin mapping. Cheap to clone; clones share plugin instances.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    plugins: HashMap<String, Arc<dyn ToolPlugin>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Replaces any existing plugin with the same name.
    pub fn register(&mut self, plugin: impl ToolPlugin + 'static) {
        self.register_arc(Arc::new(plugin));
    }

    pub fn register_arc(&mut self, plugin: Arc<dyn ToolPlugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.plugins.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolPlugin>> {
        self.plugins.get(name).cloned()
    }

    /// A copy of this registry with extra plugins layered on top. Used to add
    /// workflow- or agent-specific tools per session.
    pub fn clone_with_extras(&self, extras: Vec<Arc<dyn ToolPlugin>>) -> Self {
        let mut cloned = self.clone();
        for plugin in extras {
            cloned.register_arc(plugin);
        }
        cloned
    }

    /// A copy restricted to an allow-list of names.
    pub fn restricted_to(&self, allowed: &[String]) -> Self {
        Self {
            plugins: self
                .plugins
                .iter()
                .filter(|(name, _)| allowed.iter().any(|a| a == *name))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        match self.plugins.get(name) {
            Some(plugin) => plugin.execute(args, ctx).await,
            None => ToolResult::error(format!("unknown tool: {}", name)),
        }
    }

    pub async fn execute_cancellable(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
        cancel: CancellationToken,
    ) -> ToolResult {
        match self.plugins.get(name) {
            Some(plugin) => plugin.execute_cancellable(args, ctx, cancel).await,
            None => ToolResult::error(format!("unknown tool: {}", name)),
        }
    }

    /// Provider-facing definitions for every registered plugin.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.plugins.values().map(|p| p.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// One-line-per-tool directory injected into system prompts.
    pub fn directory(&self) -> String {
        let mut lines: Vec<String> = self
            .plugins
            .values()
            .map(|p| format!("- {}: {}", p.name(), p.description()))
            .collect();
        lines.sort();
        lines.join("\n")
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
