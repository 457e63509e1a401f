//! Anthropic Claude API adapter with SSE streaming

use crate::provider::{AiProvider, ChunkStream, LlmError, LlmResult};
use crate::types::{ChatConfig, StreamChunk, ToolCallRequest, ToolSpec};
use agentmesh_core::{Message, Role};
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Per-session adapter state: the tool calls this session has emitted
/// (needed to rebuild `tool_use` blocks on follow-up turns) and the cancel
/// token of the in-flight stream.
#[derive(Default)]
struct SessionState {
    tool_calls: HashMap<String, (String, serde_json::Value)>,
    cancel: Option<CancellationToken>,
}

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    sessions: Arc<DashMap<String, SessionState>>,
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: ANTHROPIC_API_URL.to_string(),
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Convert kernel history into Anthropic wire messages. A model message
    /// followed by tool messages becomes an assistant turn with `tool_use`
    /// blocks (rebuilt from session state) and one user turn holding all the
    /// `tool_result` blocks.
    fn build_messages(&self, session_id: &str, history: &[Message]) -> Vec<WireMessage> {
        let recorded: HashMap<String, (String, serde_json::Value)> = self
            .sessions
            .get(session_id)
            .map(|s| s.tool_calls.clone())
            .unwrap_or_default();

        let mut out = Vec::new();
        let mut i = 0;
        while i < history.len() {
            match history[i].role {
                Role::User => {
                    out.push(WireMessage {
                        role: "user".into(),
                        content: serde_json::json!(history[i].content),
                    });
                    i += 1;
                }
                Role::Model => {
                    // Collect the run of tool results answering this turn
                    let mut results = Vec::new();
                    let mut j = i + 1;
                    while j < history.len() && history[j].role == Role::Tool {
                        results.push(&history[j]);
                        j += 1;
                    }

                    let mut blocks = Vec::new();
                    if !history[i].content.is_empty() {
                        blocks.push(serde_json::json!({
                            "type": "text",
                            "text": history[i].content,
                        }));
                    }
                    for result in &results {
                        if let Some(id) = &result.tool_call_id {
                            let (name, input) = recorded
                                .get(id)
                                .cloned()
                                .unwrap_or_else(|| (String::new(), serde_json::json!({})));
                            blocks.push(serde_json::json!({
                                "type": "tool_use",
                                "id": id,
                                "name": name,
                                "input": input,
                            }));
                        }
                    }
                    out.push(WireMessage {
                        role: "assistant".into(),
                        content: serde_json::Value::Array(blocks),
                    });

                    if !results.is_empty() {
                        let result_blocks: Vec<serde_json::Value> = results
                            .iter()
                            .map(|r| {
                                serde_json::json!({
                                    "type": "tool_result",
                                    "tool_use_id": r.tool_call_id.clone().unwrap_or_default(),
                                    "content": r.content,
                                })
                            })
                            .collect();
                        out.push(WireMessage {
                            role: "user".into(),
                            content: serde_json::Value::Array(result_blocks),
                        });
                    }
                    i = j;
                }
                Role::Tool => {
                    // Orphaned tool result; submit as plain user text
                    out.push(WireMessage {
                        role: "user".into(),
                        content: serde_json::json!(history[i].content),
                    });
                    i += 1;
                }
            }
        }
        out
    }
}

#[async_trait::async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat(
        &self,
        config: ChatConfig,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> LlmResult<ChunkStream> {
        let messages = self.build_messages(&config.session_id, history);

        let body = AnthropicRequest {
            model: config.model.clone(),
            messages,
            max_tokens: config.max_tokens,
            stream: true,
            system: config.system.clone(),
            temperature: config.temperature,
            tools: if tools.is_empty() {
                None
            } else {
                Some(
                    tools
                        .iter()
                        .map(|t| AnthropicTool {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            input_schema: t.input_schema.clone(),
                        })
                        .collect(),
                )
            },
        };

        debug!("anthropic request: model={}", body.model);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("anthropic error {}: {}", status, error_text);
            return Err(match status.as_u16() {
                401 => LlmError::AuthFailed(error_text),
                429 => LlmError::RateLimited {
                    retry_after_ms: 60_000,
                },
                _ => LlmError::RequestFailed(format!("{}: {}", status, error_text)),
            });
        }

        let cancel = CancellationToken::new();
        self.sessions
            .entry(config.session_id.clone())
            .or_default()
            .cancel = Some(cancel.clone());

        let stream = parse_sse_stream(
            response.bytes_stream(),
            cancel,
            self.sessions.clone(),
            config.session_id.clone(),
        );
        Ok(Box::pin(stream))
    }

    fn abort(&self, session_id: &str) {
        if let Some(mut state) = self.sessions.get_mut(session_id) {
            if let Some(cancel) = state.cancel.take() {
                cancel.cancel();
            }
        }
    }

    fn end_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

fn parse_sse_stream(
    bytes_stream: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    cancel: CancellationToken,
    sessions: Arc<DashMap<String, SessionState>>,
    session_id: String,
) -> impl futures::Stream<Item = LlmResult<StreamChunk>> + Send {
    async_stream::stream! {
        let mut buffer = String::new();
        let mut current_tool: Option<(String, String, String)> = None; // (id, name, args json)
        let mut output_tokens = 0usize;

        tokio::pin!(bytes_stream);

        loop {
            let chunk_result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    yield Err(LlmError::Aborted);
                    return;
                }
                next = bytes_stream.next() => match next {
                    Some(r) => r,
                    None => break,
                },
            };

            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(LlmError::StreamError(e.to_string()));
                    continue;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(event_end) = buffer.find("\n\n") {
                let event_str = buffer[..event_end].to_string();
                buffer = buffer[event_end + 2..].to_string();

                let mut event_type = String::new();
                let mut event_data = String::new();
                for line in event_str.lines() {
                    if let Some(rest) = line.strip_prefix("event: ") {
                        event_type = rest.to_string();
                    } else if let Some(rest) = line.strip_prefix("data: ") {
                        event_data = rest.to_string();
                    }
                }
                if event_data.is_empty() {
                    continue;
                }

                match event_type.as_str() {
                    "content_block_start" => {
                        if let Ok(data) = serde_json::from_str::<ContentBlockStart>(&event_data) {
                            if let ContentBlockType::ToolUse { id, name } = data.content_block {
                                current_tool = Some((id, name, String::new()));
                            }
                        }
                    }
                    "content_block_delta" => {
                        if let Ok(data) = serde_json::from_str::<ContentBlockDelta>(&event_data) {
                            match data.delta {
                                DeltaType::TextDelta { text } => {
                                    yield Ok(StreamChunk::Text { text });
                                }
                                DeltaType::ThinkingDelta { .. } => {}
                                DeltaType::InputJsonDelta { partial_json } => {
                                    if let Some((_, _, ref mut args)) = current_tool {
                                        args.push_str(&partial_json);
                                    }
                                }
                            }
                        }
                    }
                    "content_block_stop" => {
                        if let Some((id, name, args)) = current_tool.take() {
                            let parsed = if args.trim().is_empty() {
                                serde_json::json!({})
                            } else {
                                match serde_json::from_str(&args) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        yield Err(LlmError::InvalidResponse(format!(
                                            "malformed tool args for {}: {}",
                                            name, e
                                        )));
                                        continue;
                                    }
                                }
                            };
                            // Record for follow-up turns
                            sessions
                                .entry(session_id.clone())
                                .or_default()
                                .tool_calls
                                .insert(id.clone(), (name.clone(), parsed.clone()));
                            yield Ok(StreamChunk::ToolCall(ToolCallRequest {
                                id,
                                name,
                                args: parsed,
                            }));
                        }
                    }
                    "message_delta" => {
                        if let Ok(data) = serde_json::from_str::<MessageDelta>(&event_data) {
                            if let Some(usage) = data.usage {
                                output_tokens = usage.output_tokens as usize;
                            }
                        }
                    }
                    "message_stop" => {
                        yield Ok(StreamChunk::Done {
                            token_count: output_tokens,
                        });
                    }
                    "error" => {
                        if let Ok(data) = serde_json::from_str::<ErrorEvent>(&event_data) {
                            yield Ok(StreamChunk::Error {
                                message: data.error.message,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ContentBlockStart {
    #[allow(dead_code)]
    index: u32,
    content_block: ContentBlockType,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlockType {
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
    #[serde(rename = "text")]
    #[allow(dead_code)]
    Text { text: String },
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    #[allow(dead_code)]
    index: u32,
    delta: DeltaType,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum DeltaType {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta {
        #[allow(dead_code)]
        thinking: String,
    },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

#[derive(Deserialize)]
struct MessageDelta {
    #[allow(dead_code)]
    delta: serde_json::Value,
    usage: Option<UsageDelta>,
}

#[derive(Deserialize)]
struct UsageDelta {
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[allow(dead_code)]
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
