//! Working-memory tools — run-scoped tagged entries shared across sessions

use crate::context::ToolContext;
use crate::registry::{ToolPlugin, ToolResult};
use serde_json::{json, Value};

fn tags_from(args: &Value) -> Vec<String> {
    args.get("tags")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| t.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

pub struct MemoryWriteTool;

#[async_trait::async_trait]
impl ToolPlugin for MemoryWriteTool {
    fn name(&self) -> &str {
        "memory_write"
    }

    fn description(&self) -> &str {
        "Record a note in shared working memory, optionally tagged."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "Short label for the note" },
                "value": { "type": "string", "description": "The note content" },
                "tags": {
                    "type": "object",
                    "description": "Array of tag strings"
                }
            },
            "required": ["key", "value"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let memory = match &ctx.memory {
            Some(m) => m,
            None => return ToolResult::error("working memory is not available in this run"),
        };
        let key = match args.get("key").and_then(|v| v.as_str()) {
            Some(k) => k,
            None => return ToolResult::error("missing required parameter: key"),
        };
        let value = match args.get("value").and_then(|v| v.as_str()) {
            Some(v) => v,
            None => return ToolResult::error("missing required parameter: value"),
        };
        memory.write(key, value, tags_from(&args), &ctx.current_agent);
        ToolResult::text(format!("remembered '{}'", key))
    }
}

pub struct MemoryReadTool;

#[async_trait::async_trait]
impl ToolPlugin for MemoryReadTool {
    fn name(&self) -> &str {
        "memory_read"
    }

    fn description(&self) -> &str {
        "Query shared working memory by substring and/or tags."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Substring to match in keys/values" },
                "tags": {
                    "type": "object",
                    "description": "Array of tags that must all be present"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let memory = match &ctx.memory {
            Some(m) => m,
            None => return ToolResult::error("working memory is not available in this run"),
        };
        let query = args.get("query").and_then(|v| v.as_str());
        let tags = tags_from(&args);
        let entries = memory.read(query, &tags);
        if entries.is_empty() {
            return ToolResult::text("no matching entries");
        }
        ToolResult::json(json!(entries
            .iter()
            .map(|e| {
                json!({
                    "key": e.key,
                    "value": e.value,
                    "tags": e.tags,
                    "author": e.author,
                })
            })
            .collect::<Vec<_>>()))
    }
}
