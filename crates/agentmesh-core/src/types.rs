//! Shared runtime types: activations, messages, tool call records, limits

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Activation identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct ActivationId(Arc<str>);

impl Serialize for ActivationId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ActivationId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(ActivationId::new)
    }
}

impl ActivationId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self::new(format!("act-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActivationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActivationId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A scheduled request to run one agent with one input.
///
/// Immutable once enqueued. `seq` is assigned by the kernel at enqueue time
/// and realizes FIFO ordering among equal priorities.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Activation {
    pub id: ActivationId,
    pub agent_path: String,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ActivationId>,
    pub spawn_depth: u32,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub seq: u64,
}

impl Activation {
    pub fn new(agent_path: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: ActivationId::generate(),
            agent_path: agent_path.into(),
            input: input.into(),
            parent_id: None,
            spawn_depth: 0,
            priority: 0,
            created_at: Utc::now(),
            seq: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Derive a child activation one level deeper than this one.
    pub fn child(&self, agent_path: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: ActivationId::generate(),
            agent_path: agent_path.into(),
            input: input.into(),
            parent_id: Some(self.id.clone()),
            spawn_depth: self.spawn_depth + 1,
            priority: self.priority,
            created_at: Utc::now(),
            seq: 0,
        }
    }
}

/// Session lifecycle. Terminal states (Completed, Aborted, Error) are sticky.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Aborted,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Error)
    }
}

/// Message role in a session history.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    Tool,
}

/// A message in a session history.
///
/// `tool` messages reference the model tool call they answer via
/// `tool_call_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Record of one executed tool call within a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

/// Run-wide budgets enforced by the kernel.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Limits {
    pub max_depth: u32,
    pub max_fanout: usize,
    pub max_concurrency: usize,
    pub token_budget: usize,
    /// Follow-up turns per session before the session errors out.
    pub max_turns: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_fanout: 5,
            max_concurrency: 3,
            token_budget: 500_000,
            max_turns: 25,
        }
    }
}
