//! agentmesh stores — the VFS, derived agent registry, event log, and the
//! run-scoped collaboration surfaces.

pub mod collab;
pub mod event_log;
pub mod registry;
pub mod vector;
pub mod vfs;

pub use collab::{Blackboard, ChannelMessage, MemoryEntry, PubSub, TaskEntry, TaskQueueStore, TaskStatus, WorkingMemory};
pub use event_log::EventLog;
pub use registry::AgentRegistry;
pub use vector::{VectorHit, VectorStore};
pub use vfs::{FileVersion, Vfs, VfsChange, WriteMeta};
