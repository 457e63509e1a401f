//! VFS tools — read, write, list, delete against the shared file store

use crate::context::ToolContext;
use crate::registry::{ToolPlugin, ToolResult};
use agentmesh_core::EventKind;
use agentmesh_store::{Vfs, WriteMeta};
use serde_json::{json, Value};
use tracing::debug;

/// Nearby-path suggestions for a missing path: same file name elsewhere, or
/// paths sharing a name fragment.
fn suggest_similar(vfs: &Vfs, missing: &str) -> Vec<String> {
    let missing = Vfs::normalize(missing);
    let name = missing.rsplit('/').next().unwrap_or(&missing).to_lowercase();
    let stem = name.trim_end_matches(".md").to_string();

    let mut hits: Vec<String> = vfs
        .get_all_paths()
        .into_iter()
        .filter(|p| {
            let candidate = p.to_lowercase();
            candidate.ends_with(&name) || (!stem.is_empty() && candidate.contains(&stem))
        })
        .take(5)
        .collect();
    hits.sort();
    hits
}

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolResult> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolResult::error(format!("missing required parameter: {}", key)))
}

// ---------------------------------------------------------------------------
// vfs_read
// ---------------------------------------------------------------------------

pub struct VfsReadTool;

#[async_trait::async_trait]
impl ToolPlugin for VfsReadTool {
    fn name(&self) -> &str {
        "vfs_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file from the shared workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace path to read" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let path = match require_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        match ctx.vfs.read(path) {
            Some(content) => ToolResult::text(content),
            None => {
                let suggestions = suggest_similar(&ctx.vfs, path);
                if suggestions.is_empty() {
                    ToolResult::text(format!("not found: {}", path))
                } else {
                    ToolResult::text(format!(
                        "not found: {}\nDid you mean:\n{}",
                        path,
                        suggestions
                            .iter()
                            .map(|s| format!("- {}", s))
                            .collect::<Vec<_>>()
                            .join("\n")
                    ))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// vfs_write
// ---------------------------------------------------------------------------

pub struct VfsWriteTool;

#[async_trait::async_trait]
impl ToolPlugin for VfsWriteTool {
    fn name(&self) -> &str {
        "vfs_write"
    }

    fn description(&self) -> &str {
        "Write a file into the shared workspace, creating or replacing it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace path to write" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let path = match require_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = match require_str(&args, "content") {
            Ok(c) => c,
            Err(e) => return e,
        };

        ctx.vfs
            .write(path, content, WriteMeta::author(&ctx.current_agent));
        ctx.event_log.append(
            EventKind::FileChange,
            Some(&ctx.current_agent),
            Some(ctx.current_activation.as_str()),
            json!({ "path": Vfs::normalize(path), "size": content.len() }),
        );
        debug!(path = %path, agent = %ctx.current_agent, "vfs_write");
        ToolResult::text(format!("wrote {} ({} bytes)", Vfs::normalize(path), content.len()))
    }
}

// ---------------------------------------------------------------------------
// vfs_list
// ---------------------------------------------------------------------------

pub struct VfsListTool;

#[async_trait::async_trait]
impl ToolPlugin for VfsListTool {
    fn name(&self) -> &str {
        "vfs_list"
    }

    fn description(&self) -> &str {
        "List workspace files under a prefix."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prefix": { "type": "string", "description": "Path prefix, e.g. 'agents/'" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let prefix = args.get("prefix").and_then(|v| v.as_str()).unwrap_or("");
        let matches = ctx.vfs.list(prefix);
        if matches.is_empty() {
            let prefixes = ctx.vfs.get_existing_prefixes();
            if prefixes.is_empty() {
                ToolResult::text("no files in the workspace yet")
            } else {
                ToolResult::text(format!(
                    "no files under '{}'. Existing prefixes:\n{}",
                    prefix,
                    prefixes
                        .iter()
                        .map(|p| format!("- {}", p))
                        .collect::<Vec<_>>()
                        .join("\n")
                ))
            }
        } else {
            ToolResult::json(json!(matches))
        }
    }
}

// ---------------------------------------------------------------------------
// vfs_delete
// ---------------------------------------------------------------------------

pub struct VfsDeleteTool;

#[async_trait::async_trait]
impl ToolPlugin for VfsDeleteTool {
    fn name(&self) -> &str {
        "vfs_delete"
    }

    fn description(&self) -> &str {
        "Delete a file from the shared workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace path to delete" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let path = match require_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        if ctx.vfs.delete_file(path) {
            ToolResult::text(format!("deleted {}", Vfs::normalize(path)))
        } else {
            ToolResult::error(format!("not found: {}", path))
        }
    }
}
