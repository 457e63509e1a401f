//! Task-queue tools — persistent cross-cycle tasks

use crate::context::ToolContext;
use crate::registry::{ToolPlugin, ToolResult};
use agentmesh_store::TaskStatus;
use serde_json::{json, Value};

pub struct TaskQueueReadTool;

#[async_trait::async_trait]
impl ToolPlugin for TaskQueueReadTool {
    fn name(&self) -> &str {
        "task_queue_read"
    }

    fn description(&self) -> &str {
        "List the persistent task queue."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> ToolResult {
        let queue = match &ctx.task_queue {
            Some(q) => q,
            None => return ToolResult::error("task queue is not available in this run"),
        };
        let tasks = queue.list();
        if tasks.is_empty() {
            return ToolResult::text("task queue is empty");
        }
        ToolResult::json(json!(tasks
            .iter()
            .map(|t| json!({
                "id": t.id,
                "description": t.description,
                "status": t.status,
            }))
            .collect::<Vec<_>>()))
    }
}

pub struct TaskQueueWriteTool;

fn parse_status(s: &str) -> Option<TaskStatus> {
    match s {
        "pending" => Some(TaskStatus::Pending),
        "in_progress" => Some(TaskStatus::InProgress),
        "done" => Some(TaskStatus::Done),
        _ => None,
    }
}

#[async_trait::async_trait]
impl ToolPlugin for TaskQueueWriteTool {
    fn name(&self) -> &str {
        "task_queue_write"
    }

    fn description(&self) -> &str {
        "Add, update, or remove persistent tasks. Actions: add (description), \
         update (id, status), remove (id)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "description": "'add', 'update', or 'remove'"
                },
                "description": {
                    "type": "string",
                    "description": "Task description (for add)"
                },
                "id": { "type": "string", "description": "Task id (for update/remove)" },
                "status": {
                    "type": "string",
                    "description": "'pending', 'in_progress', or 'done' (for update)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let queue = match &ctx.task_queue {
            Some(q) => q,
            None => return ToolResult::error("task queue is not available in this run"),
        };
        let action = match args.get("action").and_then(|v| v.as_str()) {
            Some(a) => a,
            None => return ToolResult::error("missing required parameter: action"),
        };

        match action {
            "add" => match args.get("description").and_then(|v| v.as_str()) {
                Some(description) => {
                    let task = queue.add(description);
                    ToolResult::text(format!("added task {}", task.id))
                }
                None => ToolResult::error("'add' requires a description"),
            },
            "update" => {
                let id = match args.get("id").and_then(|v| v.as_str()) {
                    Some(id) => id,
                    None => return ToolResult::error("'update' requires an id"),
                };
                let status = match args
                    .get("status")
                    .and_then(|v| v.as_str())
                    .and_then(parse_status)
                {
                    Some(s) => s,
                    None => {
                        return ToolResult::error(
                            "'update' requires status pending|in_progress|done",
                        )
                    }
                };
                if queue.update(id, status) {
                    ToolResult::text(format!("updated {}", id))
                } else {
                    ToolResult::error(format!("no task with id {}", id))
                }
            }
            "remove" => {
                let id = match args.get("id").and_then(|v| v.as_str()) {
                    Some(id) => id,
                    None => return ToolResult::error("'remove' requires an id"),
                };
                if queue.remove(id) {
                    ToolResult::text(format!("removed {}", id))
                } else {
                    ToolResult::error(format!("no task with id {}", id))
                }
            }
            other => ToolResult::error(format!("unknown action: {}", other)),
        }
    }
}
