//! Core types for agentmesh

pub mod error;
pub mod event;
pub mod profile;
pub mod types;

pub use error::{Error, Result};
pub use event::{EventKind, EventLogEntry, ReplayCheckpoint};
pub use profile::{AgentProfile, AutonomousConfig, CustomToolDef, McpServerDef, McpTransport, SafetyMode};
pub use types::{
    Activation, ActivationId, Limits, Message, Role, SessionStatus, ToolCallRecord,
};
