//! AI provider trait

use crate::types::{ChatConfig, StreamChunk, ToolSpec};
use agentmesh_core::Message;
use futures::Stream;
use std::pin::Pin;

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("aborted")]
    Aborted,

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Lazy, finite, non-restartable sequence of completion chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = LlmResult<StreamChunk>> + Send>>;

/// The provider contract.
///
/// Adapters keep per-session conversation state so follow-up turns (after
/// tool results) can re-submit provider-specific tool call ids. `end_session`
/// discards that state; `abort` best-effort cancels any in-flight stream for
/// the session.
#[async_trait::async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(
        &self,
        config: ChatConfig,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> LlmResult<ChunkStream>;

    fn abort(&self, session_id: &str);

    fn end_session(&self, _session_id: &str) {}
}
