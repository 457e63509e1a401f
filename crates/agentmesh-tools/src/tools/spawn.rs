//! spawn_agent — create (or reuse) an agent file and enqueue it
//!
//! Budgets are enforced before any file is written or any state mutated.

use crate::context::ToolContext;
use crate::registry::{ToolPlugin, ToolResult};
use agentmesh_core::EventKind;
use agentmesh_store::WriteMeta;
use serde_json::{json, Value};
use tracing::info;

pub struct SpawnAgentTool;

fn agent_path_for(filename: &str) -> String {
    let name = filename.trim().trim_start_matches('/');
    if name.starts_with("agents/") {
        name.to_string()
    } else {
        format!("agents/{}", name)
    }
}

#[async_trait::async_trait]
impl ToolPlugin for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Create a child agent from a markdown definition and queue it with a task. \
         If the agent file already exists it is reused as-is."
    }

    fn prompt(&self) -> &str {
        "spawn_agent creates a helper agent and hands it a task. Provide the full \
         markdown definition (front-matter with at least a name, body as its prompt) \
         and a specific, self-contained task."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Agent file name, e.g. 'researcher.md' (placed under agents/)"
                },
                "content": {
                    "type": "string",
                    "description": "Full markdown agent definition with front-matter"
                },
                "task": {
                    "type": "string",
                    "description": "The task handed to the spawned agent"
                }
            },
            "required": ["filename", "content", "task"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let filename = match args.get("filename").and_then(|v| v.as_str()) {
            Some(f) if !f.trim().is_empty() => f,
            _ => return ToolResult::error("missing required parameter: filename"),
        };
        let content = match args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolResult::error("missing required parameter: content"),
        };
        let task = match args.get("task").and_then(|v| v.as_str()) {
            Some(t) => t,
            None => return ToolResult::error("missing required parameter: task"),
        };

        if let Err(reason) = ctx.check_spawn_budget() {
            return ToolResult::error(reason);
        }

        let path = agent_path_for(filename);
        if !path.ends_with(".md") {
            return ToolResult::error(format!("agent files must be markdown: {}", path));
        }

        // Reuse an already-registered agent; otherwise write and register.
        if ctx.registry.get(&path).is_none() {
            ctx.vfs
                .write(&path, content, WriteMeta::author(&ctx.current_agent));
            ctx.event_log.append(
                EventKind::FileChange,
                Some(&ctx.current_agent),
                Some(ctx.current_activation.as_str()),
                json!({ "path": path, "size": content.len() }),
            );
            if ctx.registry.get(&path).is_none() {
                // Registration happens via the VFS subscription; absence
                // here means the front-matter was rejected.
                return ToolResult::error(format!(
                    "agent file {} was written but could not be registered (invalid front-matter)",
                    path
                ));
            }
        }

        let input = ctx.handoff_packet(task, None);
        let activation = ctx.child_activation(&path, input, 0);

        ctx.event_log.append(
            EventKind::Spawn,
            Some(&ctx.current_agent),
            Some(ctx.current_activation.as_str()),
            json!({
                "spawned": path,
                "depth": activation.spawn_depth,
                "task": task,
            }),
        );
        info!(parent = %ctx.current_agent, spawned = %path, depth = activation.spawn_depth, "spawn_agent");

        ctx.increment_spawn_count();
        let id = activation.id.clone();
        ctx.spawner.spawn_activation(activation);

        ToolResult::text(format!("spawned {} (activation {})", path, id))
    }
}
