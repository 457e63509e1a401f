//! Agent registry — derived index of agent-typed VFS files
//!
//! The registry is always a function of VFS state: it observes writes to
//! paths under `agents/` and rebuilds the profile for that path.

use crate::vfs::{Vfs, VfsChange};
use agentmesh_core::{AgentProfile, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct AgentRegistry {
    agents: DashMap<String, Arc<AgentProfile>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    /// Whether a VFS path is agent-typed.
    pub fn is_agent_path(path: &str) -> bool {
        path.starts_with("agents/") && path.ends_with(".md")
    }

    /// A registry subscribed to the VFS so agent files track writes and
    /// deletes from the moment of construction.
    pub fn attached(vfs: &Vfs) -> Arc<Self> {
        let registry = Arc::new(Self::new());
        Self::subscribe_to(&registry, vfs);
        registry
    }

    fn subscribe_to(registry: &Arc<Self>, vfs: &Vfs) {
        let registry = Arc::clone(registry);
        vfs.subscribe(move |change| match change {
            VfsChange::Write { path, content } if Self::is_agent_path(path) => {
                if let Err(e) = registry.register_from_file(path, content) {
                    warn!(path = %path, "agent registration failed: {}", e);
                }
            }
            VfsChange::Delete { path } if Self::is_agent_path(path) => {
                registry.unregister(path);
            }
            _ => {}
        });
    }

    pub fn register_from_file(&self, path: &str, content: &str) -> Result<Arc<AgentProfile>> {
        let profile = Arc::new(AgentProfile::parse(path, content)?);
        debug!(path = %path, name = %profile.name, "agent registered");
        self.agents.insert(path.to_string(), profile.clone());
        Ok(profile)
    }

    pub fn unregister(&self, path: &str) -> bool {
        let removed = self.agents.remove(path).is_some();
        if removed {
            debug!(path = %path, "agent unregistered");
        }
        removed
    }

    pub fn get(&self, path: &str) -> Option<Arc<AgentProfile>> {
        self.agents.get(path).map(|e| e.clone())
    }

    pub fn list_all(&self) -> Vec<Arc<AgentProfile>> {
        self.agents.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::WriteMeta;

    #[test]
    fn attached_registry_tracks_vfs() {
        let vfs = Vfs::new();
        let registry = AgentRegistry::attached(&vfs);

        vfs.write(
            "agents/echo.md",
            "---\nname: Echo\n---\nEcho the user.",
            WriteMeta::default(),
        );
        let profile = registry.get("agents/echo.md").expect("registered");
        assert_eq!(profile.name, "Echo");

        // Rewrite rebuilds the profile
        vfs.write(
            "agents/echo.md",
            "---\nname: Echo2\n---\nNew prompt.",
            WriteMeta::default(),
        );
        assert_eq!(registry.get("agents/echo.md").unwrap().name, "Echo2");

        vfs.delete_file("agents/echo.md");
        assert!(registry.get("agents/echo.md").is_none());
    }

    #[test]
    fn non_agent_paths_ignored() {
        let vfs = Vfs::new();
        let registry = AgentRegistry::attached(&vfs);

        vfs.write("notes/echo.md", "---\nname: X\n---\nY", WriteMeta::default());
        vfs.write("agents/readme.txt", "not markdown", WriteMeta::default());
        assert!(registry.is_empty());
    }

    #[test]
    fn invalid_front_matter_is_not_fatal() {
        let vfs = Vfs::new();
        let registry = AgentRegistry::attached(&vfs);

        vfs.write("agents/bad.md", "no front matter here", WriteMeta::default());
        assert!(registry.get("agents/bad.md").is_none());
    }
}
