//! Per-call tool context
//!
//! The kernel builds one `ToolContext` per tool invocation. Cyclic references
//! (session -> kernel -> tools) are broken by the two handle traits: the
//! kernel implements them and hands itself in as trait objects.

use agentmesh_core::{Activation, ActivationId};
use agentmesh_store::{
    AgentRegistry, Blackboard, EventLog, PubSub, TaskQueueStore, VectorStore, Vfs, WorkingMemory,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Receiver for activations produced by tool handlers (spawn, delegate,
/// signal). The kernel validates and enqueues them.
pub trait ActivationSink: Send + Sync {
    fn spawn_activation(&self, activation: Activation);
}

/// Synchronous sub-run: executes one activation under the concurrency limit
/// and returns the final assistant text. Available to tools only when the
/// kernel supports it in the current mode.
#[async_trait::async_trait]
pub trait SyncRunner: Send + Sync {
    async fn run_session_and_return(&self, activation: Activation) -> Result<String, String>;
}

#[derive(Clone)]
pub struct ToolContext {
    pub vfs: Arc<Vfs>,
    pub registry: Arc<AgentRegistry>,
    pub event_log: Arc<EventLog>,

    pub current_agent: String,
    pub current_activation: ActivationId,
    pub parent_agent: Option<String>,

    pub spawn_depth: u32,
    pub max_depth: u32,
    pub max_fanout: usize,
    /// Children this session already had when the call started.
    pub child_count: usize,
    /// Shared counter of spawns this session has performed.
    pub spawn_count: Arc<AtomicUsize>,

    pub spawner: Arc<dyn ActivationSink>,
    pub sync_runner: Option<Arc<dyn SyncRunner>>,

    pub api_key: Option<String>,
    pub preferred_model: Option<String>,
    pub search_api_key: Option<String>,

    pub memory: Option<Arc<WorkingMemory>>,
    pub task_queue: Option<Arc<TaskQueueStore>>,
    pub blackboard: Option<Arc<Blackboard>>,
    pub pubsub: Option<Arc<PubSub>>,
    pub vector_store: Option<Arc<dyn VectorStore>>,
}

impl ToolContext {
    pub fn spawn_count(&self) -> usize {
        self.spawn_count.load(Ordering::SeqCst)
    }

    pub fn increment_spawn_count(&self) {
        self.spawn_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Enforce depth and fanout before any state is touched. Returns the
    /// user-facing error message on violation.
    pub fn check_spawn_budget(&self) -> Result<(), String> {
        if self.spawn_depth >= self.max_depth {
            return Err("depth limit reached".to_string());
        }
        if self.child_count + self.spawn_count() >= self.max_fanout {
            return Err("fanout limit reached".to_string());
        }
        Ok(())
    }

    /// Build the structured handoff input for a child: the task plus up to
    /// the last 10 shared working-memory entries.
    pub fn handoff_packet(&self, task: &str, extra_context: Option<&str>) -> String {
        let mut packet = format!("TASK (from {}):\n{}", self.current_agent, task);
        if let Some(extra) = extra_context {
            if !extra.is_empty() {
                packet.push_str("\n\nCONTEXT:\n");
                packet.push_str(extra);
            }
        }
        if let Some(memory) = &self.memory {
            let recent = memory.recent(10);
            if !recent.is_empty() {
                packet.push_str("\n\nSHARED WORKING MEMORY (recent):\n");
                for entry in recent {
                    packet.push_str(&format!("- {}: {}\n", entry.key, entry.value));
                }
            }
        }
        packet
    }

    /// Derive a child activation of the current one.
    pub fn child_activation(&self, agent_path: &str, input: String, priority: i32) -> Activation {
        let mut activation = Activation::new(agent_path, input).with_priority(priority);
        activation.parent_id = Some(self.current_activation.clone());
        activation.spawn_depth = self.spawn_depth + 1;
        activation
    }
}
