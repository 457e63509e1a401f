//! MCP client manager — bridges external MCP servers into the tool registry
//!
//! `connect` is idempotent per server name: one underlying connection no
//! matter how many agents declare the server. Tools surface as
//! `mcp:<server>:<tool>` plugins. Only `http` and `sse` transports are
//! remotely callable; `stdio` is rejected with a warning event because the
//! runtime does not spawn subprocesses.

use crate::context::ToolContext;
use crate::registry::{ToolPlugin, ToolResult};
use agentmesh_core::{EventKind, McpServerDef, McpTransport};
use dashmap::DashMap;
use agentmesh_store::EventLog;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Clone, Debug, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

/// One live JSON-RPC connection to an MCP server.
pub struct McpConnection {
    pub name: String,
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
    tools: Vec<McpToolInfo>,
}

impl McpConnection {
    pub fn tools(&self) -> &[McpToolInfo] {
        &self.tools
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("{} request failed: {}", method, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("{} returned HTTP {}", method, status));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| format!("{} bad response: {}", method, e))?;

        if let Some(err) = envelope.get("error") {
            return Err(format!(
                "{} error: {}",
                method,
                err.get("message").and_then(|m| m.as_str()).unwrap_or("?")
            ));
        }
        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Invoke one tool on this server and flatten its content to text.
    pub async fn call_tool(&self, tool: &str, args: Value) -> Result<String, String> {
        let result = self
            .rpc("tools/call", json!({ "name": tool, "arguments": args }))
            .await?;

        let content = result
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_else(|| result.to_string());

        if result
            .get("isError")
            .and_then(|e| e.as_bool())
            .unwrap_or(false)
        {
            Err(content)
        } else {
            Ok(content)
        }
    }
}

#[derive(Default)]
pub struct McpClientManager {
    connections: DashMap<String, Arc<McpConnection>>,
}

impl McpClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to a declared server. Repeated calls with an already-connected
    /// name return the existing connection.
    pub async fn connect(
        &self,
        def: &McpServerDef,
        event_log: &EventLog,
    ) -> Result<Arc<McpConnection>, String> {
        if let Some(existing) = self.connections.get(&def.name) {
            return Ok(existing.clone());
        }

        if def.transport == McpTransport::Stdio {
            let message = format!(
                "MCP server '{}' uses stdio transport, which this runtime cannot spawn",
                def.name
            );
            warn!("{}", message);
            event_log.append(EventKind::Warning, None, None, json!({ "message": message }));
            return Err(message);
        }

        let url = def
            .url
            .clone()
            .ok_or_else(|| format!("MCP server '{}' has no url", def.name))?;

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| format!("client error: {}", e))?;

        let connection = McpConnection {
            name: def.name.clone(),
            url,
            client,
            next_id: AtomicU64::new(1),
            tools: Vec::new(),
        };

        connection
            .rpc(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "agentmesh", "version": env!("CARGO_PKG_VERSION") },
                }),
            )
            .await?;

        let listing = connection.rpc("tools/list", json!({})).await?;
        let tools: Vec<McpToolInfo> = listing
            .get("tools")
            .and_then(|t| serde_json::from_value(t.clone()).ok())
            .unwrap_or_default();

        info!(server = %def.name, tools = tools.len(), "MCP server connected");

        let connection = Arc::new(McpConnection {
            tools,
            ..connection
        });

        // First writer wins under concurrent connects to the same name.
        let entry = self
            .connections
            .entry(def.name.clone())
            .or_insert_with(|| connection.clone());
        Ok(entry.clone())
    }

    pub fn get(&self, name: &str) -> Option<Arc<McpConnection>> {
        self.connections.get(name).map(|c| c.clone())
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    pub fn disconnect(&self, name: &str) -> bool {
        self.connections.remove(name).is_some()
    }

    /// Bridge plugins (`mcp:<server>:<tool>`) for a connected server.
    pub fn plugins_for(&self, server: &str) -> Vec<Arc<dyn ToolPlugin>> {
        let Some(connection) = self.get(server) else {
            return Vec::new();
        };
        connection
            .tools()
            .iter()
            .map(|info| {
                Arc::new(McpBridgeTool {
                    connection: connection.clone(),
                    info: info.clone(),
                    full_name: format!("mcp:{}:{}", server, info.name),
                }) as Arc<dyn ToolPlugin>
            })
            .collect()
    }
}

struct McpBridgeTool {
    connection: Arc<McpConnection>,
    info: McpToolInfo,
    full_name: String,
}

#[async_trait::async_trait]
impl ToolPlugin for McpBridgeTool {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters(&self) -> Value {
        self.info
            .input_schema
            .clone()
            .unwrap_or_else(|| json!({ "type": "object", "properties": {} }))
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        match self.connection.call_tool(&self.info.name, args).await {
            Ok(text) => ToolResult::text(text),
            Err(e) => ToolResult::error(format!("{}: {}", self.full_name, e)),
        }
    }
}
