//! delegate — hand a task to an already-registered agent

use crate::context::ToolContext;
use crate::registry::{ToolPlugin, ToolResult};
use agentmesh_core::EventKind;
use serde_json::{json, Value};
use tracing::info;

pub struct DelegateTool;

#[async_trait::async_trait]
impl ToolPlugin for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn description(&self) -> &str {
        "Queue a task for an existing agent. The agent receives a structured \
         handoff including recent shared working memory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "description": "Path of the target agent, e.g. 'agents/researcher.md'"
                },
                "task": {
                    "type": "string",
                    "description": "The task to delegate"
                },
                "priority": {
                    "type": "number",
                    "description": "Queue priority; smaller runs first (default 0)"
                },
                "context": {
                    "type": "string",
                    "description": "Extra context included in the handoff"
                }
            },
            "required": ["agent", "task"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let agent = match args.get("agent").and_then(|v| v.as_str()) {
            Some(a) => a,
            None => return ToolResult::error("missing required parameter: agent"),
        };
        let task = match args.get("task").and_then(|v| v.as_str()) {
            Some(t) => t,
            None => return ToolResult::error("missing required parameter: task"),
        };
        let priority = args.get("priority").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
        let extra = args.get("context").and_then(|v| v.as_str());

        if let Err(reason) = ctx.check_spawn_budget() {
            return ToolResult::error(reason);
        }

        if ctx.registry.get(agent).is_none() {
            return ToolResult::error(format!("unknown agent: {}", agent));
        }

        let input = ctx.handoff_packet(task, extra);
        let activation = ctx.child_activation(agent, input, priority);

        ctx.event_log.append(
            EventKind::Spawn,
            Some(&ctx.current_agent),
            Some(ctx.current_activation.as_str()),
            json!({
                "spawned": agent,
                "depth": activation.spawn_depth,
                "task": task,
            }),
        );
        info!(from = %ctx.current_agent, to = %agent, priority, "delegate");

        ctx.increment_spawn_count();
        let id = activation.id.clone();
        ctx.spawner.spawn_activation(activation);

        ToolResult::text(format!("delegated to {} (activation {})", agent, id))
    }
}
