//! agentmesh tools — plugin contract, built-in tools, custom tools, and the
//! MCP bridge
//!
//! Each built-in is a self-contained module in src/tools/. To add a tool:
//! create the file, implement ToolPlugin, register in
//! create_default_registry().

pub mod context;
pub mod custom;
pub mod mcp;
pub mod registry;
pub mod tools;

pub use context::{ActivationSink, SyncRunner, ToolContext};
pub use custom::CustomToolPlugin;
pub use mcp::{McpClientManager, McpConnection, McpToolInfo};
pub use registry::{ToolPlugin, ToolRegistry, ToolResult};

use agentmesh_core::AgentProfile;
use std::sync::Arc;

/// The default registry with every built-in tool.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // --- VFS ---
    registry.register(tools::vfs::VfsReadTool);
    registry.register(tools::vfs::VfsWriteTool);
    registry.register(tools::vfs::VfsListTool);
    registry.register(tools::vfs::VfsDeleteTool);

    // --- Queue mutation ---
    registry.register(tools::spawn::SpawnAgentTool);
    registry.register(tools::delegate::DelegateTool);
    registry.register(tools::signal::SignalParentTool);

    // --- Collaboration surfaces ---
    registry.register(tools::blackboard::BlackboardReadTool);
    registry.register(tools::blackboard::BlackboardWriteTool);
    registry.register(tools::memory::MemoryReadTool);
    registry.register(tools::memory::MemoryWriteTool);
    registry.register(tools::task_queue::TaskQueueReadTool);
    registry.register(tools::task_queue::TaskQueueWriteTool);

    // --- Web ---
    registry.register(tools::web_fetch::WebFetchTool);
    registry.register(tools::web_search::WebSearchTool);

    registry
}

/// The per-session registry for one agent: the base registry, restricted to
/// the profile's allow-list when present, plus the profile's custom tools.
pub fn registry_for_profile(base: &ToolRegistry, profile: &AgentProfile) -> ToolRegistry {
    let mut registry = match &profile.tools {
        Some(allowed) => base.restricted_to(allowed),
        None => base.clone(),
    };
    for def in &profile.custom_tools {
        registry.register_arc(Arc::new(CustomToolPlugin::new(def.clone())));
    }
    registry
}
