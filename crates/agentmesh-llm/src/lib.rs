//! LLM provider abstractions for agentmesh
//!
//! Providers expose one streaming contract: `chat` yields a lazy sequence of
//! [`StreamChunk`]s — text deltas, fully-buffered tool calls, a final `Done`
//! with the provider-reported output token count, or an error.

pub mod anthropic;
pub mod mock;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use mock::{ScriptedProvider, ScriptedStep};
pub use provider::{AiProvider, ChunkStream, LlmError, LlmResult};
pub use types::{ChatConfig, StreamChunk, ToolCallRequest, ToolSpec};
