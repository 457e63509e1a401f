//! Virtual file system — keyed path -> content store with version history
//! and synchronous change notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, RwLock};
use tracing::debug;

/// Metadata supplied with a write.
#[derive(Clone, Debug, Default)]
pub struct WriteMeta {
    pub author: Option<String>,
}

impl WriteMeta {
    pub fn author(name: impl Into<String>) -> Self {
        Self {
            author: Some(name.into()),
        }
    }
}

/// One versioned entry appended per write.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileVersion {
    pub timestamp: DateTime<Utc>,
    pub author: Option<String>,
    pub size: usize,
    /// Signed char delta against the previous version.
    pub delta_chars: i64,
}

#[derive(Clone, Debug)]
struct FileEntry {
    content: String,
    versions: Vec<FileVersion>,
}

/// Change notification delivered synchronously to subscribers, after the
/// mutation is committed.
#[derive(Clone, Debug)]
pub enum VfsChange {
    Write { path: String, content: String },
    Delete { path: String },
}

type Subscriber = Box<dyn Fn(&VfsChange) + Send + Sync>;

/// In-memory virtual file system. Paths are normalized forward-slash strings.
pub struct Vfs {
    files: RwLock<BTreeMap<String, FileEntry>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Normalize to a forward-slash relative path.
    pub fn normalize(path: &str) -> String {
        let p = path.trim().replace('\\', "/");
        let p = p.trim_start_matches("./").trim_start_matches('/');
        let mut out = String::with_capacity(p.len());
        let mut prev_slash = false;
        for c in p.chars() {
            if c == '/' {
                if prev_slash {
                    continue;
                }
                prev_slash = true;
            } else {
                prev_slash = false;
            }
            out.push(c);
        }
        out
    }

    /// Register a change subscriber. Subscribers run synchronously inside
    /// every mutation, after the store is updated.
    pub fn subscribe(&self, f: impl Fn(&VfsChange) + Send + Sync + 'static) {
        self.subscribers.lock().unwrap().push(Box::new(f));
    }

    fn notify(&self, change: &VfsChange) {
        let subs = self.subscribers.lock().unwrap();
        for sub in subs.iter() {
            sub(change);
        }
    }

    pub fn read(&self, path: &str) -> Option<String> {
        let path = Self::normalize(path);
        self.files
            .read()
            .unwrap()
            .get(&path)
            .map(|e| e.content.clone())
    }

    pub fn exists(&self, path: &str) -> bool {
        let path = Self::normalize(path);
        self.files.read().unwrap().contains_key(&path)
    }

    pub fn write(&self, path: &str, content: impl Into<String>, meta: WriteMeta) {
        let path = Self::normalize(path);
        let content = content.into();
        {
            let mut files = self.files.write().unwrap();
            let prev_size = files.get(&path).map(|e| e.content.len()).unwrap_or(0);
            let version = FileVersion {
                timestamp: Utc::now(),
                author: meta.author,
                size: content.len(),
                delta_chars: content.len() as i64 - prev_size as i64,
            };
            let entry = files.entry(path.clone()).or_insert_with(|| FileEntry {
                content: String::new(),
                versions: Vec::new(),
            });
            entry.content = content.clone();
            entry.versions.push(version);
        }
        debug!(path = %path, size = content.len(), "vfs write");
        self.notify(&VfsChange::Write { path, content });
    }

    /// Remove a file. Returns false if the path was absent.
    pub fn delete_file(&self, path: &str) -> bool {
        let path = Self::normalize(path);
        let removed = self.files.write().unwrap().remove(&path).is_some();
        if removed {
            debug!(path = %path, "vfs delete");
            self.notify(&VfsChange::Delete { path });
        }
        removed
    }

    /// Paths under the given prefix, in lexicographic order.
    pub fn list(&self, prefix: &str) -> Vec<String> {
        let prefix = Self::normalize(prefix);
        self.files
            .read()
            .unwrap()
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn get_all_paths(&self) -> Vec<String> {
        self.files.read().unwrap().keys().cloned().collect()
    }

    /// Every directory prefix that currently contains at least one file,
    /// each ending in `/`.
    pub fn get_existing_prefixes(&self) -> Vec<String> {
        let files = self.files.read().unwrap();
        let mut prefixes = BTreeSet::new();
        for path in files.keys() {
            let mut idx = 0;
            while let Some(pos) = path[idx..].find('/') {
                idx += pos + 1;
                prefixes.insert(path[..idx].to_string());
            }
        }
        prefixes.into_iter().collect()
    }

    /// Version history for a path, oldest first.
    pub fn versions(&self, path: &str) -> Vec<FileVersion> {
        let path = Self::normalize(path);
        self.files
            .read()
            .unwrap()
            .get(&path)
            .map(|e| e.versions.clone())
            .unwrap_or_default()
    }

    /// Full snapshot of path -> content.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.files
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.content.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn normalize_paths() {
        assert_eq!(Vfs::normalize("agents\\a.md"), "agents/a.md");
        assert_eq!(Vfs::normalize("./agents/a.md"), "agents/a.md");
        assert_eq!(Vfs::normalize("/agents//a.md"), "agents/a.md");
    }

    #[test]
    fn write_read_delete() {
        let vfs = Vfs::new();
        assert!(vfs.read("notes.md").is_none());
        vfs.write("notes.md", "hello", WriteMeta::default());
        assert_eq!(vfs.read("notes.md").as_deref(), Some("hello"));
        assert!(vfs.delete_file("notes.md"));
        assert!(vfs.read("notes.md").is_none());
        assert!(!vfs.delete_file("notes.md"));
    }

    #[test]
    fn versions_accumulate() {
        let vfs = Vfs::new();
        vfs.write("a.md", "one", WriteMeta::author("tester"));
        vfs.write("a.md", "longer content", WriteMeta::default());
        let versions = vfs.versions("a.md");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].size, 3);
        assert_eq!(versions[0].author.as_deref(), Some("tester"));
        assert_eq!(versions[1].delta_chars, "longer content".len() as i64 - 3);
    }

    #[test]
    fn list_by_prefix() {
        let vfs = Vfs::new();
        vfs.write("agents/a.md", "x", WriteMeta::default());
        vfs.write("agents/b.md", "y", WriteMeta::default());
        vfs.write("outputs/r.md", "z", WriteMeta::default());
        assert_eq!(vfs.list("agents/").len(), 2);
        assert_eq!(vfs.list(""), vfs.get_all_paths());
    }

    #[test]
    fn existing_prefixes() {
        let vfs = Vfs::new();
        vfs.write("agents/sub/a.md", "x", WriteMeta::default());
        let prefixes = vfs.get_existing_prefixes();
        assert_eq!(prefixes, vec!["agents/".to_string(), "agents/sub/".to_string()]);
    }

    #[test]
    fn subscribers_fire_synchronously() {
        let vfs = Vfs::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        vfs.subscribe(move |change| {
            if matches!(change, VfsChange::Write { .. }) {
                h.fetch_add(1, Ordering::SeqCst);
            }
        });
        vfs.write("a.md", "x", WriteMeta::default());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        vfs.delete_file("a.md");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
