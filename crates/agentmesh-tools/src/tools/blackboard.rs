//! Blackboard tools — lightweight run-scoped key/value signals

use crate::context::ToolContext;
use crate::registry::{ToolPlugin, ToolResult};
use serde_json::{json, Value};

pub struct BlackboardReadTool;

#[async_trait::async_trait]
impl ToolPlugin for BlackboardReadTool {
    fn name(&self) -> &str {
        "blackboard_read"
    }

    fn description(&self) -> &str {
        "Read a value from the shared blackboard. Omit 'key' to list all keys."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "Blackboard key" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let blackboard = match &ctx.blackboard {
            Some(b) => b,
            None => return ToolResult::error("blackboard is not available in this run"),
        };
        match args.get("key").and_then(|v| v.as_str()) {
            Some(key) => match blackboard.read(key) {
                Some(value) => ToolResult::text(value),
                None => ToolResult::text(format!("(no value for '{}')", key)),
            },
            None => {
                let mut keys = blackboard.keys();
                keys.sort();
                ToolResult::json(json!(keys))
            }
        }
    }
}

pub struct BlackboardWriteTool;

#[async_trait::async_trait]
impl ToolPlugin for BlackboardWriteTool {
    fn name(&self) -> &str {
        "blackboard_write"
    }

    fn description(&self) -> &str {
        "Write a value onto the shared blackboard, visible to every session in the run."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "Blackboard key" },
                "value": { "type": "string", "description": "Value to store" }
            },
            "required": ["key", "value"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let blackboard = match &ctx.blackboard {
            Some(b) => b,
            None => return ToolResult::error("blackboard is not available in this run"),
        };
        let key = match args.get("key").and_then(|v| v.as_str()) {
            Some(k) => k,
            None => return ToolResult::error("missing required parameter: key"),
        };
        let value = match args.get("value").and_then(|v| v.as_str()) {
            Some(v) => v,
            None => return ToolResult::error("missing required parameter: value"),
        };
        blackboard.write(key, value);
        ToolResult::text(format!("set {}", key))
    }
}
