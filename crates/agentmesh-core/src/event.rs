//! Event log entries and replay checkpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured event kinds surfaced to the UI and the event log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Activation,
    ToolCall,
    ToolResult,
    FileChange,
    Spawn,
    Signal,
    Warning,
    Error,
    Abort,
    Complete,
    WorkflowStart,
    WorkflowStep,
    WorkflowComplete,
}

impl EventKind {
    /// Kinds that get a VFS checkpoint attached on append.
    pub fn is_restorable(&self) -> bool {
        matches!(
            self,
            Self::Spawn | Self::FileChange | Self::Complete | Self::Error
        )
    }
}

/// One appended event. `id` assignment is total-ordered.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_id: Option<String>,
    pub data: serde_json::Value,
}

/// A full-VFS snapshot keyed to an event, supporting restore and replay.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayCheckpoint {
    pub id: String,
    pub event_id: u64,
    /// path -> content at the event's commit point
    pub files: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_id: Option<String>,
}
