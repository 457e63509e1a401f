//! ScriptedProvider — deterministic streaming responses for tests
//!
//! Each `chat` call pops the next step from the script. An exhausted script
//! falls back to a default text response, so loops terminate.

use crate::provider::{AiProvider, ChunkStream, LlmError, LlmResult};
use crate::types::{ChatConfig, StreamChunk, ToolCallRequest, ToolSpec};
use agentmesh_core::Message;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One scripted model turn.
#[derive(Clone, Debug)]
pub enum ScriptedStep {
    /// Stream text in small chunks, then `Done { tokens }`.
    Text { text: String, tokens: usize },
    /// Emit buffered tool calls, then `Done { tokens }`.
    ToolCalls {
        calls: Vec<(String, serde_json::Value)>,
        tokens: usize,
    },
    /// Text followed by tool calls.
    TextThenTools {
        text: String,
        calls: Vec<(String, serde_json::Value)>,
        tokens: usize,
    },
    /// Stream the same chunk on an interval until aborted. Never emits Done.
    StreamForever { chunk: String, interval_ms: u64 },
    /// Yield a stream error chunk.
    Fail { message: String },
    /// Fail the `chat` call itself.
    Refuse { message: String },
}

impl ScriptedStep {
    pub fn text(text: impl Into<String>, tokens: usize) -> Self {
        Self::Text {
            text: text.into(),
            tokens,
        }
    }

    pub fn tool_call(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self::ToolCalls {
            calls: vec![(name.into(), args)],
            tokens: 1,
        }
    }
}

pub struct ScriptedProvider {
    steps: Mutex<Vec<ScriptedStep>>,
    default_step: ScriptedStep,
    call_count: Mutex<usize>,
    aborts: Arc<DashMap<String, CancellationToken>>,
}

impl ScriptedProvider {
    /// A provider that always plays the same step.
    pub fn constant(step: ScriptedStep) -> Self {
        Self {
            steps: Mutex::new(Vec::new()),
            default_step: step,
            call_count: Mutex::new(0),
            aborts: Arc::new(DashMap::new()),
        }
    }

    /// A provider that consumes `steps` in order, then plays a default.
    pub fn sequence(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: Mutex::new(steps),
            default_step: ScriptedStep::text("(script exhausted)", 1),
            call_count: Mutex::new(0),
            aborts: Arc::new(DashMap::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    fn next_step(&self) -> ScriptedStep {
        *self.call_count.lock().unwrap() += 1;
        let mut steps = self.steps.lock().unwrap();
        if steps.is_empty() {
            self.default_step.clone()
        } else {
            steps.remove(0)
        }
    }
}

fn tool_call_chunks(calls: Vec<(String, serde_json::Value)>) -> Vec<StreamChunk> {
    calls
        .into_iter()
        .enumerate()
        .map(|(i, (name, args))| {
            StreamChunk::ToolCall(ToolCallRequest {
                id: format!("call-{}-{}", i, uuid_fragment()),
                name,
                args,
            })
        })
        .collect()
}

fn uuid_fragment() -> String {
    let id = uuid::Uuid::new_v4().to_string();
    id.split('-').next().unwrap_or("0").to_string()
}

#[async_trait::async_trait]
impl AiProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        config: ChatConfig,
        _history: &[Message],
        _tools: &[ToolSpec],
    ) -> LlmResult<ChunkStream> {
        let step = self.next_step();
        if let ScriptedStep::Refuse { message } = &step {
            return Err(LlmError::RequestFailed(message.clone()));
        }

        let cancel = CancellationToken::new();
        self.aborts.insert(config.session_id.clone(), cancel.clone());

        let stream = async_stream::stream! {
            match step {
                ScriptedStep::Text { text, tokens } => {
                    for chunk in text.as_bytes().chunks(20) {
                        yield Ok(StreamChunk::Text {
                            text: String::from_utf8_lossy(chunk).to_string(),
                        });
                    }
                    yield Ok(StreamChunk::Done { token_count: tokens });
                }
                ScriptedStep::ToolCalls { calls, tokens } => {
                    for chunk in tool_call_chunks(calls) {
                        yield Ok(chunk);
                    }
                    yield Ok(StreamChunk::Done { token_count: tokens });
                }
                ScriptedStep::TextThenTools { text, calls, tokens } => {
                    yield Ok(StreamChunk::Text { text });
                    for chunk in tool_call_chunks(calls) {
                        yield Ok(chunk);
                    }
                    yield Ok(StreamChunk::Done { token_count: tokens });
                }
                ScriptedStep::StreamForever { chunk, interval_ms } => {
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                yield Err(LlmError::Aborted);
                                return;
                            }
                            _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {
                                yield Ok(StreamChunk::Text { text: chunk.clone() });
                            }
                        }
                    }
                }
                ScriptedStep::Fail { message } => {
                    yield Ok(StreamChunk::Error { message });
                }
                ScriptedStep::Refuse { .. } => unreachable!("handled before streaming"),
            }
        };

        Ok(Box::pin(stream))
    }

    fn abort(&self, session_id: &str) {
        if let Some(token) = self.aborts.get(session_id) {
            token.cancel();
        }
    }

    fn end_session(&self, session_id: &str) {
        self.aborts.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    async fn drain(provider: &ScriptedProvider, session: &str) -> (String, Vec<ToolCallRequest>, Option<usize>) {
        let mut stream = provider
            .chat(ChatConfig::new(session, "mock"), &[], &[])
            .await
            .unwrap();
        let mut text = String::new();
        let mut calls = Vec::new();
        let mut tokens = None;
        while let Some(Ok(chunk)) = stream.next().await {
            match chunk {
                StreamChunk::Text { text: t } => text.push_str(&t),
                StreamChunk::ToolCall(tc) => calls.push(tc),
                StreamChunk::Done { token_count } => {
                    tokens = Some(token_count);
                    break;
                }
                StreamChunk::Error { .. } => break,
            }
        }
        (text, calls, tokens)
    }

    #[tokio::test]
    async fn scripted_text_response() {
        let provider = ScriptedProvider::constant(ScriptedStep::text("hello world", 5));
        let (text, calls, tokens) = drain(&provider, "s1").await;
        assert_eq!(text, "hello world");
        assert!(calls.is_empty());
        assert_eq!(tokens, Some(5));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn scripted_tool_calls() {
        let provider = ScriptedProvider::constant(ScriptedStep::ToolCalls {
            calls: vec![
                ("vfs_read".into(), json!({"path": "a.md"})),
                ("vfs_list".into(), json!({"prefix": ""})),
            ],
            tokens: 2,
        });
        let (_, calls, tokens) = drain(&provider, "s1").await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "vfs_read");
        assert_eq!(calls[1].name, "vfs_list");
        assert_eq!(tokens, Some(2));
    }

    #[tokio::test]
    async fn scripted_sequence_exhaustion() {
        let provider = ScriptedProvider::sequence(vec![ScriptedStep::text("first", 1)]);
        let (first, _, _) = drain(&provider, "s1").await;
        assert_eq!(first, "first");
        let (fallback, _, _) = drain(&provider, "s1").await;
        assert!(fallback.contains("script exhausted"));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn scripted_abort_ends_forever_stream() {
        let provider = ScriptedProvider::constant(ScriptedStep::StreamForever {
            chunk: "tick".into(),
            interval_ms: 5,
        });
        let mut stream = provider
            .chat(ChatConfig::new("s1", "mock"), &[], &[])
            .await
            .unwrap();
        // Let a few chunks through, then abort
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamChunk::Text { .. }));
        provider.abort("s1");
        let mut saw_abort = false;
        while let Some(item) = stream.next().await {
            if matches!(item, Err(LlmError::Aborted)) {
                saw_abort = true;
                break;
            }
        }
        assert!(saw_abort);
    }

    #[tokio::test]
    async fn scripted_refuse_fails_chat() {
        let provider = ScriptedProvider::constant(ScriptedStep::Refuse {
            message: "API down".into(),
        });
        let result = provider.chat(ChatConfig::new("s1", "mock"), &[], &[]).await;
        assert!(result.is_err());
    }
}
