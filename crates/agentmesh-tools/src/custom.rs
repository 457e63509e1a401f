//! Custom tools — declarative prompt-template tools backed by ephemeral
//! worker agents
//!
//! A `CustomToolDef` becomes a regular plugin. On invocation the prompt
//! template is resolved, an ephemeral agent file is synthesized and
//! registered, and the worker either runs synchronously (when the kernel
//! offers a sync runner) or is queued.

use crate::context::ToolContext;
use crate::registry::{ToolPlugin, ToolResult};
use agentmesh_core::{CustomToolDef, EventKind};
use agentmesh_store::WriteMeta;
use serde_json::{json, Value};
use tracing::debug;

pub struct CustomToolPlugin {
    def: CustomToolDef,
}

impl CustomToolPlugin {
    pub fn new(def: CustomToolDef) -> Self {
        Self { def }
    }

    /// Replace `{{param}}` placeholders with supplied args. Unmatched
    /// placeholders are kept literally.
    fn resolve_prompt(&self, args: &Value) -> String {
        let mut prompt = self.def.prompt.clone();
        if let Some(map) = args.as_object() {
            for (key, value) in map {
                let needle = format!("{{{{{}}}}}", key);
                let replacement = match value.as_str() {
                    Some(s) => s.to_string(),
                    None => value.to_string(),
                };
                prompt = prompt.replace(&needle, &replacement);
            }
        }
        prompt
    }

    fn worker_markdown(&self) -> String {
        let mut front = format!("name: \"{}-worker\"\n", self.def.name);
        if let Some(model) = &self.def.model {
            front.push_str(&format!("model: {}\n", model));
        }

        let mut body = format!(
            "You are a tool executor for the '{}' tool. Perform the requested \
             operation precisely and reply with the result only — no preamble.",
            self.def.name
        );
        if let Some(schema) = &self.def.result_schema {
            body.push_str(&format!(
                "\n\nReply with JSON matching this schema:\n{}",
                serde_json::to_string_pretty(schema).unwrap_or_default()
            ));
        }

        format!("---\n{}---\n{}\n", front, body)
    }
}

#[async_trait::async_trait]
impl ToolPlugin for CustomToolPlugin {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn description(&self) -> &str {
        &self.def.description
    }

    fn parameters(&self) -> Value {
        // Accept either a ready JSON schema or the short map form
        // {param: {type, description, required}}.
        if self.def.parameters.get("type").is_some() {
            return self.def.parameters.clone();
        }
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        if let Some(map) = self.def.parameters.as_object() {
            for (name, decl) in map {
                let mut prop = serde_json::Map::new();
                prop.insert(
                    "type".into(),
                    decl.get("type").cloned().unwrap_or(json!("string")),
                );
                if let Some(desc) = decl.get("description") {
                    prop.insert("description".into(), desc.clone());
                }
                if decl.get("required").and_then(|r| r.as_bool()).unwrap_or(false) {
                    required.push(json!(name));
                }
                properties.insert(name.clone(), Value::Object(prop));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        if let Err(reason) = ctx.check_spawn_budget() {
            return ToolResult::error(reason);
        }

        let resolved = self.resolve_prompt(&args);
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let path = format!("agents/_custom_{}_{}.md", self.def.name, stamp);

        ctx.vfs.write(
            &path,
            self.worker_markdown(),
            WriteMeta::author(&ctx.current_agent),
        );
        if ctx.registry.get(&path).is_none() {
            return ToolResult::error(format!("failed to register worker agent {}", path));
        }
        debug!(tool = %self.def.name, worker = %path, "custom tool invocation");

        let activation = ctx.child_activation(&path, resolved, 0);
        ctx.event_log.append(
            EventKind::Spawn,
            Some(&ctx.current_agent),
            Some(ctx.current_activation.as_str()),
            json!({
                "spawned": path,
                "depth": activation.spawn_depth,
                "task": self.def.name,
            }),
        );
        ctx.increment_spawn_count();

        match &ctx.sync_runner {
            Some(runner) => match runner.run_session_and_return(activation).await {
                Ok(result) => ToolResult::text(result),
                Err(e) => ToolResult::error(format!("{} worker failed: {}", self.def.name, e)),
            },
            None => {
                let id = activation.id.clone();
                ctx.spawner.spawn_activation(activation);
                ToolResult::text(format!(
                    "dispatched {} worker (activation {})",
                    self.def.name, id
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def_with_prompt(prompt: &str) -> CustomToolDef {
        CustomToolDef {
            name: "summarize".into(),
            description: "summarize text".into(),
            parameters: json!({
                "text": { "type": "string", "description": "input", "required": true }
            }),
            prompt: prompt.into(),
            model: None,
            result_schema: None,
        }
    }

    #[test]
    fn prompt_substitution() {
        let plugin = CustomToolPlugin::new(def_with_prompt("Summarize: {{text}} ({{missing}})"));
        let resolved = plugin.resolve_prompt(&json!({"text": "hello"}));
        assert_eq!(resolved, "Summarize: hello ({{missing}})");
    }

    #[test]
    fn schema_from_short_form() {
        let plugin = CustomToolPlugin::new(def_with_prompt("p"));
        let schema = plugin.parameters();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["text"]["type"], "string");
        assert_eq!(schema["required"][0], "text");
    }

    #[test]
    fn worker_markdown_parses_as_agent() {
        let mut def = def_with_prompt("p");
        def.model = Some("claude-haiku-4-5".into());
        def.result_schema = Some(json!({"type": "object"}));
        let plugin = CustomToolPlugin::new(def);
        let markdown = plugin.worker_markdown();
        let profile =
            agentmesh_core::AgentProfile::parse("agents/_custom_summarize_x.md", &markdown)
                .unwrap();
        assert_eq!(profile.name, "summarize-worker");
        assert_eq!(profile.model.as_deref(), Some("claude-haiku-4-5"));
        assert!(profile.system_prompt.contains("schema"));
    }
}
