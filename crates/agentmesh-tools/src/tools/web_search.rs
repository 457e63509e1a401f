//! web_search — query the configured search provider

use crate::context::ToolContext;
use crate::registry::{ToolPlugin, ToolResult};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

pub struct WebSearchTool;

#[derive(Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

#[async_trait::async_trait]
impl ToolPlugin for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return a summary with sources. Requires a \
         configured search API key."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let query = match args.get("query").and_then(|v| v.as_str()) {
            Some(q) => q,
            None => return ToolResult::error("missing required parameter: query"),
        };

        let key = match &ctx.search_api_key {
            Some(k) if !k.is_empty() => k.clone(),
            _ => return ToolResult::error("no search API key configured"),
        };

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
        {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("client error: {}", e)),
        };

        let response = match client
            .get(BRAVE_SEARCH_URL)
            .query(&[("q", query), ("count", "5")])
            .header("X-Subscription-Token", key)
            .header("Accept", "application/json")
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("search failed: {}", e)),
        };

        let status = response.status();
        if !status.is_success() {
            return ToolResult::error(format!("search provider returned HTTP {}", status));
        }

        let parsed: BraveResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("bad search response: {}", e)),
        };

        let results = parsed.web.map(|w| w.results).unwrap_or_default();
        debug!(query = %query, hits = results.len(), "web_search");
        if results.is_empty() {
            return ToolResult::text(format!("no results for '{}'", query));
        }

        let mut out = String::new();
        for (i, r) in results.iter().enumerate() {
            out.push_str(&format!("{}. {}\n   {}\n", i + 1, r.title, r.url));
            if !r.description.is_empty() {
                out.push_str(&format!("   {}\n", r.description));
            }
        }
        ToolResult::text(out)
    }
}
