//! Collaboration surfaces — blackboard, pub/sub channels, working memory,
//! and the persistent task queue.
//!
//! Every surface is run-scoped: the run controller constructs fresh
//! instances (or clears them) per run. Single-writer-at-a-time per key;
//! readers observe consistent snapshots.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Blackboard — key -> value map for lightweight signals
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Blackboard {
    entries: DashMap<String, String>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|e| e.clone())
    }

    pub fn write(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

// ---------------------------------------------------------------------------
// Pub/Sub — named channels with retained history
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel: String,
    pub sender: String,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

struct Channel {
    tx: broadcast::Sender<ChannelMessage>,
    history: Mutex<Vec<ChannelMessage>>,
}

#[derive(Default)]
pub struct PubSub {
    channels: DashMap<String, Channel>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, name: &str) -> dashmap::mapref::one::Ref<'_, String, Channel> {
        if !self.channels.contains_key(name) {
            let (tx, _) = broadcast::channel(256);
            self.channels.entry(name.to_string()).or_insert(Channel {
                tx,
                history: Mutex::new(Vec::new()),
            });
        }
        self.channels.get(name).unwrap()
    }

    pub fn publish(&self, channel: &str, sender: &str, payload: impl Into<String>) {
        let message = ChannelMessage {
            channel: channel.to_string(),
            sender: sender.to_string(),
            payload: payload.into(),
            timestamp: Utc::now(),
        };
        let ch = self.channel(channel);
        ch.history.lock().unwrap().push(message.clone());
        let _ = ch.tx.send(message);
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<ChannelMessage> {
        self.channel(channel).tx.subscribe()
    }

    pub fn history(&self, channel: &str) -> Vec<ChannelMessage> {
        self.channels
            .get(channel)
            .map(|ch| ch.history.lock().unwrap().clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.channels.clear();
    }
}

// ---------------------------------------------------------------------------
// Working memory — run-scoped tagged entries visible to all sessions
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    pub tags: Vec<String>,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
pub struct WorkingMemory {
    entries: Mutex<Vec<MemoryEntry>>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        tags: Vec<String>,
        author: &str,
    ) {
        self.entries.lock().unwrap().push(MemoryEntry {
            key: key.into(),
            value: value.into(),
            tags,
            author: author.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Entries matching an optional substring query and all given tags.
    pub fn read(&self, query: Option<&str>, tags: &[String]) -> Vec<MemoryEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                let query_hit = query.map_or(true, |q| {
                    let q = q.to_lowercase();
                    e.key.to_lowercase().contains(&q) || e.value.to_lowercase().contains(&q)
                });
                let tags_hit = tags.iter().all(|t| e.tags.contains(t));
                query_hit && tags_hit
            })
            .cloned()
            .collect()
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<MemoryEntry> {
        let entries = self.entries.lock().unwrap();
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Human-readable snapshot used by handoff packets and cycle summaries.
    pub fn render_snapshot(&self) -> String {
        let entries = self.entries.lock().unwrap();
        if entries.is_empty() {
            return String::new();
        }
        entries
            .iter()
            .map(|e| {
                if e.tags.is_empty() {
                    format!("- {}: {}", e.key, e.value)
                } else {
                    format!("- {} [{}]: {}", e.key, e.tags.join(","), e.value)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

// ---------------------------------------------------------------------------
// Task queue — persistent cross-cycle tasks
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskEntry {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct TaskQueueStore {
    tasks: Mutex<Vec<TaskEntry>>,
}

impl TaskQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, description: impl Into<String>) -> TaskEntry {
        let now = Utc::now();
        let task = TaskEntry {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            description: description.into(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.tasks.lock().unwrap().push(task.clone());
        task
    }

    pub fn update(&self, id: &str, status: TaskStatus) -> bool {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.status = status;
                task.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        tasks.len() < before
    }

    /// The oldest pending task, if any.
    pub fn next_pending(&self) -> Option<TaskEntry> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.status == TaskStatus::Pending)
            .cloned()
    }

    pub fn list(&self) -> Vec<TaskEntry> {
        self.tasks.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blackboard_read_write() {
        let bb = Blackboard::new();
        assert!(bb.read("k").is_none());
        bb.write("k", "v");
        assert_eq!(bb.read("k").as_deref(), Some("v"));
        bb.clear();
        assert!(bb.read("k").is_none());
    }

    #[tokio::test]
    async fn pubsub_delivers_and_retains() {
        let ps = PubSub::new();
        let mut rx = ps.subscribe("updates");
        ps.publish("updates", "agent-a", "done");
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.payload, "done");
        assert_eq!(ps.history("updates").len(), 1);
        assert!(ps.history("other").is_empty());
    }

    #[test]
    fn memory_query_and_tags() {
        let wm = WorkingMemory::new();
        wm.write("plan", "draft the outline", vec!["phase1".into()], "a");
        wm.write("status", "outline complete", vec!["phase1".into(), "done".into()], "b");

        assert_eq!(wm.read(Some("outline"), &[]).len(), 2);
        assert_eq!(wm.read(None, &["done".to_string()]).len(), 1);
        assert_eq!(wm.read(Some("plan"), &["done".to_string()]).len(), 0);
    }

    #[test]
    fn memory_recent_keeps_order() {
        let wm = WorkingMemory::new();
        for i in 0..15 {
            wm.write(format!("k{}", i), "v", vec![], "a");
        }
        let recent = wm.recent(10);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].key, "k5");
        assert_eq!(recent[9].key, "k14");
    }

    #[test]
    fn task_queue_lifecycle() {
        let tq = TaskQueueStore::new();
        let t1 = tq.add("first");
        let t2 = tq.add("second");

        assert_eq!(tq.next_pending().unwrap().id, t1.id);
        assert!(tq.update(&t1.id, TaskStatus::Done));
        assert_eq!(tq.next_pending().unwrap().id, t2.id);
        assert!(tq.remove(&t2.id));
        assert!(tq.next_pending().is_none());
        assert!(!tq.update("missing", TaskStatus::Done));
    }
}
