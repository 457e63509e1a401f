//! Append-only event log with checkpoint snapshots
//!
//! Appends are totally ordered. Restorable event kinds (spawn, file_change,
//! complete, error) get a full-VFS checkpoint keyed by event id.

use crate::registry::AgentRegistry;
use crate::vfs::{Vfs, WriteMeta};
use agentmesh_core::{Error, EventKind, EventLogEntry, ReplayCheckpoint, Result};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub struct EventLog {
    vfs: Arc<Vfs>,
    entries: Mutex<Vec<EventLogEntry>>,
    checkpoints: DashMap<u64, ReplayCheckpoint>,
    watch_tx: broadcast::Sender<EventLogEntry>,
}

impl EventLog {
    pub fn new(vfs: Arc<Vfs>) -> Self {
        let (watch_tx, _) = broadcast::channel(1024);
        Self {
            vfs,
            entries: Mutex::new(Vec::new()),
            checkpoints: DashMap::new(),
            watch_tx,
        }
    }

    /// Append an event; returns its id. Ids are dense and start at 1.
    pub fn append(
        &self,
        kind: EventKind,
        agent_path: Option<&str>,
        activation_id: Option<&str>,
        data: serde_json::Value,
    ) -> u64 {
        let entry = {
            let mut entries = self.entries.lock().unwrap();
            let id = entries.len() as u64 + 1;
            let entry = EventLogEntry {
                id,
                timestamp: Utc::now(),
                kind,
                agent_path: agent_path.map(String::from),
                activation_id: activation_id.map(String::from),
                data,
            };
            entries.push(entry.clone());
            entry
        };

        if kind.is_restorable() {
            let checkpoint = ReplayCheckpoint {
                id: format!("cp-{}", uuid::Uuid::new_v4()),
                event_id: entry.id,
                files: self.vfs.snapshot(),
                agent_path: entry.agent_path.clone(),
                activation_id: entry.activation_id.clone(),
            };
            self.checkpoints.insert(entry.id, checkpoint);
        }

        let _ = self.watch_tx.send(entry.clone());
        entry.id
    }

    /// Ordered snapshot of all entries.
    pub fn entries(&self) -> Vec<EventLogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Live feed of appended entries.
    pub fn watch(&self) -> broadcast::Receiver<EventLogEntry> {
        self.watch_tx.subscribe()
    }

    pub fn get_checkpoint(&self, event_id: u64) -> Option<ReplayCheckpoint> {
        self.checkpoints.get(&event_id).map(|e| e.clone())
    }

    /// Restore the VFS (and, through its subscription, the registry) to the
    /// checkpoint state. The checkpoint is validated in full before any
    /// mutation; a malformed entry rejects the restore untouched.
    pub fn restore_checkpoint(
        &self,
        checkpoint: &ReplayCheckpoint,
        registry: &AgentRegistry,
    ) -> Result<()> {
        for (path, content) in &checkpoint.files {
            if path.trim().is_empty() || path.contains('\\') || path.starts_with('/') {
                return Err(Error::CheckpointRejected(format!(
                    "malformed path {:?}",
                    path
                )));
            }
            if AgentRegistry::is_agent_path(path) {
                // Agent files must re-register cleanly after restore.
                agentmesh_core::AgentProfile::parse(path, content).map_err(|e| {
                    Error::CheckpointRejected(format!("agent file {}: {}", path, e))
                })?;
            }
        }

        for path in self.vfs.get_all_paths() {
            if !checkpoint.files.contains_key(&path) {
                self.vfs.delete_file(&path);
            }
        }
        for (path, content) in &checkpoint.files {
            self.vfs
                .write(path, content.clone(), WriteMeta::author("checkpoint"));
        }

        // The attached registry already re-registered on write; cover the
        // detached-registry case too.
        for (path, content) in &checkpoint.files {
            if AgentRegistry::is_agent_path(path) && registry.get(path).is_none() {
                registry.register_from_file(path, content)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (Arc<Vfs>, Arc<AgentRegistry>, EventLog) {
        let vfs = Arc::new(Vfs::new());
        let registry = AgentRegistry::attached(&vfs);
        let log = EventLog::new(vfs.clone());
        (vfs, registry, log)
    }

    #[test]
    fn append_assigns_dense_ids() {
        let (_vfs, _reg, log) = setup();
        let a = log.append(EventKind::Activation, Some("agents/a.md"), None, json!({}));
        let b = log.append(EventKind::Warning, None, None, json!({"message": "w"}));
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].timestamp <= entries[1].timestamp);
    }

    #[test]
    fn restorable_kinds_get_checkpoints() {
        let (vfs, _reg, log) = setup();
        vfs.write("agents/a.md", "---\nname: A\n---\nP", WriteMeta::default());
        let id = log.append(
            EventKind::FileChange,
            None,
            None,
            json!({"path": "agents/a.md", "size": 5}),
        );
        let cp = log.get_checkpoint(id).expect("checkpoint");
        assert_eq!(cp.event_id, id);
        assert!(cp.files.contains_key("agents/a.md"));

        let other = log.append(EventKind::ToolCall, None, None, json!({}));
        assert!(log.get_checkpoint(other).is_none());
    }

    #[test]
    fn restore_round_trip() {
        let (vfs, registry, log) = setup();
        vfs.write("agents/a.md", "---\nname: A\n---\nP", WriteMeta::default());
        vfs.write("docs/x.md", "one", WriteMeta::default());
        let id = log.append(EventKind::Complete, None, None, json!({"tokens": 1}));
        let cp = log.get_checkpoint(id).unwrap();

        // Diverge: mutate and add noise
        vfs.write("docs/x.md", "two", WriteMeta::default());
        vfs.write("docs/extra.md", "noise", WriteMeta::default());
        vfs.delete_file("agents/a.md");
        assert!(registry.get("agents/a.md").is_none());

        log.restore_checkpoint(&cp, &registry).unwrap();
        assert_eq!(vfs.read("docs/x.md").as_deref(), Some("one"));
        assert!(vfs.read("docs/extra.md").is_none());
        assert!(registry.get("agents/a.md").is_some());
        assert_eq!(vfs.get_all_paths().len(), cp.files.len());
    }

    #[test]
    fn restore_rejects_malformed_without_mutation() {
        let (vfs, registry, log) = setup();
        vfs.write("docs/x.md", "keep", WriteMeta::default());
        let id = log.append(EventKind::Complete, None, None, json!({}));
        let mut cp = log.get_checkpoint(id).unwrap();
        cp.files.insert("/absolute/bad".into(), "x".into());

        let err = log.restore_checkpoint(&cp, &registry).unwrap_err();
        assert!(matches!(err, Error::CheckpointRejected(_)));
        assert_eq!(vfs.read("docs/x.md").as_deref(), Some("keep"));
    }
}
