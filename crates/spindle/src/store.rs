//! Result storage keyed by `(call node, version hash)`.
//!
//! The store is an abstract keyed map; the engine only ever asks three things
//! of it. Completed results from older function versions are never evicted —
//! redefining a function writes under a new version hash, so both versions'
//! results coexist and reruns of either version skip work already done.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    error::{Error, Result},
    graph::CallNode,
    hash::{ContentHash, Hasher},
    value::Value,
};

/// Abstract keyed storage. Implementations must be safe to share across the
/// queued driver's workers.
pub trait Store: Send + Sync {
    fn contains(&self, node: &CallNode, version: ContentHash) -> Result<bool>;
    fn get(&self, node: &CallNode, version: ContentHash) -> Result<Option<Value>>;
    fn put(&self, node: &CallNode, version: ContentHash, value: Value) -> Result<()>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<AHashMap<(CallNode, ContentHash), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored results, across all versions.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn contains(&self, node: &CallNode, version: ContentHash) -> Result<bool> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.contains_key(&(node.clone(), version)))
    }

    fn get(&self, node: &CallNode, version: ContentHash) -> Result<Option<Value>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&(node.clone(), version)).cloned())
    }

    fn put(&self, node: &CallNode, version: ContentHash, value: Value) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert((node.clone(), version), value);
        Ok(())
    }
}

/// What a disk store writes per key: the key is kept alongside the value so a
/// digest collision is detected instead of silently served.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    node: CallNode,
    version: ContentHash,
    value: Value,
}

/// One postcard-encoded file per key under a directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::Storage(format!("cannot create {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, node: &CallNode, version: ContentHash) -> PathBuf {
        let mut hasher = Hasher::new("spindle.store.key");
        node.feed(&mut hasher);
        hasher.update(version.as_bytes());
        self.root.join(format!("{}.bin", hasher.finish().to_hex()))
    }
}

impl Store for DiskStore {
    fn contains(&self, node: &CallNode, version: ContentHash) -> Result<bool> {
        self.entry_path(node, version)
            .try_exists()
            .map_err(|e| Error::Storage(e.to_string()))
    }

    fn get(&self, node: &CallNode, version: ContentHash) -> Result<Option<Value>> {
        let path = self.entry_path(node, version);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Storage(format!("cannot read {}: {e}", path.display()))),
        };
        let entry: StoredEntry =
            postcard::from_bytes(&bytes).map_err(|e| Error::Storage(format!("corrupt entry {}: {e}", path.display())))?;
        if entry.node != *node || entry.version != version {
            return Err(Error::Storage(format!("store key collision at {}", path.display())));
        }
        Ok(Some(entry.value))
    }

    fn put(&self, node: &CallNode, version: ContentHash, value: Value) -> Result<()> {
        let path = self.entry_path(node, version);
        let entry = StoredEntry {
            node: node.clone(),
            version,
            value,
        };
        let bytes = postcard::to_allocvec(&entry).map_err(|e| Error::Storage(e.to_string()))?;
        fs::write(&path, bytes).map_err(|e| Error::Storage(format!("cannot write {}: {e}", path.display())))
    }
}

/// Store wrapper with the operations drivers actually speak.
#[derive(Clone, Copy)]
pub struct StoreAccessor<'a> {
    store: &'a dyn Store,
}

impl<'a> StoreAccessor<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Whether a result exists for this call at this version.
    pub fn completed(&self, node: &CallNode, version: ContentHash) -> Result<bool> {
        self.store.contains(node, version)
    }

    /// Loads a completed result; an incomplete key is an error.
    pub fn load(&self, node: &CallNode, version: ContentHash) -> Result<Value> {
        self.store.get(node, version)?.ok_or_else(|| {
            Error::NotCompleted(format!("{node} at version {}", &version.to_hex()[..12]))
        })
    }

    /// Writes a result. Rewriting the same key is a no-op in effect; a
    /// conflicting write wins as the latest value, and drivers never depend
    /// on conflict detection.
    pub fn store(&self, node: &CallNode, version: ContentHash, value: Value) -> Result<()> {
        trace!(%node, version = %&version.to_hex()[..12], "store result");
        self.store.put(node, version, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> CallNode {
        CallNode::new(name, vec![Value::Int(7)])
    }

    fn version(tag: &str) -> ContentHash {
        let mut hasher = Hasher::new("test");
        hasher.update_str(tag);
        hasher.finish()
    }

    #[test]
    fn accessor_load_requires_completion() {
        let store = MemoryStore::new();
        let accessor = StoreAccessor::new(&store);
        let (n, v) = (node("f"), version("v0"));

        assert!(!accessor.completed(&n, v).unwrap());
        assert!(matches!(accessor.load(&n, v), Err(Error::NotCompleted(_))));

        accessor.store(&n, v, "result".into()).unwrap();
        assert!(accessor.completed(&n, v).unwrap());
        assert_eq!(accessor.load(&n, v).unwrap(), Value::from("result"));
    }

    #[test]
    fn versions_do_not_collide() {
        let store = MemoryStore::new();
        let accessor = StoreAccessor::new(&store);
        let n = node("f");

        accessor.store(&n, version("v0"), 0.into()).unwrap();
        accessor.store(&n, version("v1"), 1.into()).unwrap();

        assert_eq!(accessor.load(&n, version("v0")).unwrap(), Value::Int(0));
        assert_eq!(accessor.load(&n, version("v1")).unwrap(), Value::Int(1));
        assert_eq!(store.len(), 2);
    }
}
