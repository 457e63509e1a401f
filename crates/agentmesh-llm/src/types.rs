//! Streaming chunk types and chat configuration

use serde::{Deserialize, Serialize};

/// A fully-buffered tool call emitted by the stream once its arguments are
/// complete.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// One chunk of a streaming completion.
#[derive(Clone, Debug)]
pub enum StreamChunk {
    Text { text: String },
    ToolCall(ToolCallRequest),
    Done { token_count: usize },
    Error { message: String },
}

/// Tool definition surfaced to the provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Per-call configuration.
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Session the call belongs to; keys adapter-side follow-up state and
    /// `abort`.
    pub session_id: String,
    pub model: String,
    pub api_key: String,
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl ChatConfig {
    pub fn new(session_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            model: model.into(),
            api_key: String::new(),
            system: None,
            max_tokens: 8192,
            temperature: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}
