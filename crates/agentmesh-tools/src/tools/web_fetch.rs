//! web_fetch — fetch a URL and return readable text

use crate::context::ToolContext;
use crate::registry::{ToolPlugin, ToolResult};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const DEFAULT_MAX_CHARS: usize = 50_000;

pub struct WebFetchTool;

impl WebFetchTool {
    async fn fetch(&self, url: &str, max_chars: usize) -> ToolResult {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolResult::error(format!("unsupported URL scheme: {}", url));
        }

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
        {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("client error: {}", e)),
        };

        let response = match client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("fetch failed: {}", e)),
        };

        let status = response.status();
        if !status.is_success() {
            return ToolResult::error(format!("HTTP {} from {}", status, url));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("body read failed: {}", e)),
        };

        let text = if is_html {
            html2text::from_read(body.as_bytes(), 100)
        } else {
            body
        };

        debug!(url = %url, chars = text.len(), html = is_html, "web_fetch");

        if text.len() > max_chars {
            let mut cut = max_chars;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            ToolResult::text(format!(
                "{}...[truncated at {} chars; total {} chars]",
                &text[..cut],
                max_chars,
                text.len()
            ))
        } else {
            ToolResult::text(text)
        }
    }
}

#[async_trait::async_trait]
impl ToolPlugin for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its content as readable text. HTML is \
         converted; output is truncated at the requested length."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The http(s) URL to fetch" },
                "maxLength": {
                    "type": "number",
                    "description": "Maximum characters to return (default 50000)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        let url = match args.get("url").and_then(|v| v.as_str()) {
            Some(u) => u,
            None => return ToolResult::error("missing required parameter: url"),
        };
        let max_chars = args
            .get("maxLength")
            .or_else(|| args.get("max_length"))
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);

        self.fetch(url, max_chars).await
    }
}
