//! signal_parent — send a message upward by activating the parent agent

use crate::context::ToolContext;
use crate::registry::{ToolPlugin, ToolResult};
use agentmesh_core::{Activation, EventKind};
use serde_json::{json, Value};

pub struct SignalParentTool;

#[async_trait::async_trait]
impl ToolPlugin for SignalParentTool {
    fn name(&self) -> &str {
        "signal_parent"
    }

    fn description(&self) -> &str {
        "Notify the agent that spawned you. The message is queued as a \
         high-priority activation for the parent."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "What to report upward"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let message = match args.get("message").and_then(|v| v.as_str()) {
            Some(m) => m,
            None => return ToolResult::error("missing required parameter: message"),
        };

        let parent = match &ctx.parent_agent {
            Some(p) => p.clone(),
            None => return ToolResult::error("no parent to signal"),
        };

        // Signals travel upward: same depth as the signalling session, top
        // priority so the parent runs next.
        let mut activation = Activation::new(
            parent.clone(),
            format!("SIGNAL from {}:\n{}", ctx.current_agent, message),
        );
        activation.parent_id = Some(ctx.current_activation.clone());
        activation.spawn_depth = ctx.spawn_depth;
        activation.priority = 0;

        ctx.event_log.append(
            EventKind::Signal,
            Some(&ctx.current_agent),
            Some(ctx.current_activation.as_str()),
            json!({ "parent": parent, "message": message }),
        );

        ctx.spawner.spawn_activation(activation);
        ToolResult::text(format!("signalled {}", parent))
    }
}
