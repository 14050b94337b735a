//! In-process coordination store.
//!
//! # Responsibilities
//! - Hierarchical nodes with per-node versions and CAS writes
//! - Session handles that own ephemeral nodes
//! - Outage injection for exercising unavailability paths
//!
//! Several proxies and backends living in one process share a `MemoryStore`,
//! each through its own `MemorySession`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{CoordinationStore, NodeKind, Stat, StoreError, Version};

type SessionId = u64;

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    version: i64,
    owner: Option<SessionId>,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    next_session: SessionId,
}

impl Tree {
    fn node_exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .next()
            .map(|(k, _)| k.starts_with(&prefix))
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct Shared {
    tree: Mutex<Tree>,
    unavailable: AtomicBool,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Tree>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(self.tree.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Handle to a shared in-memory node tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session against this store.
    pub fn session(&self) -> MemorySession {
        let id = {
            let mut tree = self.shared.tree.lock().unwrap_or_else(PoisonError::into_inner);
            tree.next_session += 1;
            tree.next_session
        };
        MemorySession {
            guard: Arc::new(SessionGuard {
                id,
                shared: self.shared.clone(),
            }),
        }
    }

    /// Simulate a store outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.shared.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of nodes currently stored, excluding the root.
    pub fn node_count(&self) -> usize {
        self.shared.tree.lock().unwrap_or_else(PoisonError::into_inner).nodes.len()
    }
}

#[derive(Debug)]
struct SessionGuard {
    id: SessionId,
    shared: Arc<Shared>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut tree = self.shared.tree.lock().unwrap_or_else(PoisonError::into_inner);
        let before = tree.nodes.len();
        tree.nodes.retain(|_, node| node.owner != Some(self.id));
        let removed = before - tree.nodes.len();
        if removed > 0 {
            tracing::debug!(session = self.id, removed, "Session ended, ephemeral nodes removed");
        }
    }
}

/// A session on a `MemoryStore`.
///
/// Clones share the session; ephemeral nodes it created disappear once the
/// last clone is dropped or closed.
#[derive(Debug, Clone)]
pub struct MemorySession {
    guard: Arc<SessionGuard>,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.guard.id
    }

    /// End this handle's share of the session.
    pub fn close(self) {
        drop(self);
    }

    fn shared(&self) -> &Shared {
        &self.guard.shared
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn stat(node: &Node) -> Stat {
    Stat {
        version: Version(node.version),
    }
}

#[async_trait]
impl CoordinationStore for MemorySession {
    async fn exists(&self, path: &str) -> Result<Option<Stat>, StoreError> {
        let tree = self.shared().lock()?;
        if path == "/" {
            return Ok(Some(Stat { version: Version(0) }));
        }
        Ok(tree.nodes.get(path).map(stat))
    }

    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat), StoreError> {
        let tree = self.shared().lock()?;
        tree.nodes
            .get(path)
            .map(|node| (node.data.clone(), stat(node)))
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn set_data(&self, path: &str, data: &[u8], expected: Version) -> Result<Stat, StoreError> {
        let mut tree = self.shared().lock()?;
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        if node.version != expected.0 {
            return Err(StoreError::VersionConflict(path.to_string()));
        }
        node.data = data.to_vec();
        node.version += 1;
        Ok(stat(node))
    }

    async fn create_node(&self, path: &str, data: &[u8], kind: NodeKind) -> Result<(), StoreError> {
        let mut tree = self.shared().lock()?;
        if tree.node_exists(path) {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        let parent = parent_of(path);
        if !tree.node_exists(parent) {
            return Err(StoreError::NotFound(parent.to_string()));
        }
        let owner = match kind {
            NodeKind::Persistent => None,
            NodeKind::Ephemeral => Some(self.guard.id),
        };
        tree.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                version: 0,
                owner,
            },
        );
        Ok(())
    }

    async fn delete_node(&self, path: &str, expected: Version) -> Result<(), StoreError> {
        let mut tree = self.shared().lock()?;
        let version = tree
            .nodes
            .get(path)
            .map(|node| node.version)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        if version != expected.0 {
            return Err(StoreError::VersionConflict(path.to_string()));
        }
        if tree.has_children(path) {
            return Err(StoreError::NotEmpty(path.to_string()));
        }
        tree.nodes.remove(path);
        Ok(())
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let tree = self.shared().lock()?;
        if !tree.node_exists(path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        let prefix = child_prefix(path);
        Ok(tree
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| &k[prefix.len()..])
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cas_rejects_stale_version() {
        let store = MemoryStore::new();
        let s = store.session();
        s.create_node("/hosts", b"", NodeKind::Persistent).await.unwrap();
        s.create_node("/hosts/a:1", b"0", NodeKind::Persistent).await.unwrap();

        let (_, st) = s.get_data("/hosts/a:1").await.unwrap();
        assert_eq!(st.version, Version(0));

        let st2 = s.set_data("/hosts/a:1", b"1", st.version).await.unwrap();
        assert_eq!(st2.version, Version(1));

        // Second write with the old token must fail and leave data untouched
        let err = s.set_data("/hosts/a:1", b"7", st.version).await.unwrap_err();
        assert_eq!(err, StoreError::VersionConflict("/hosts/a:1".into()));
        let (data, _) = s.get_data("/hosts/a:1").await.unwrap();
        assert_eq!(data, b"1");
    }

    #[tokio::test]
    async fn test_ephemeral_nodes_die_with_session() {
        let store = MemoryStore::new();
        let admin = store.session();
        admin.create_node("/hosts", b"", NodeKind::Persistent).await.unwrap();

        let backend = store.session();
        let backend_clone = backend.clone();
        backend.create_node("/hosts/b:2", b"0", NodeKind::Ephemeral).await.unwrap();

        backend.close();
        // Still alive while a clone holds the session
        assert!(admin.exists("/hosts/b:2").await.unwrap().is_some());

        drop(backend_clone);
        assert!(admin.exists("/hosts/b:2").await.unwrap().is_none());
        assert!(admin.exists("/hosts").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_requires_parent_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let s = store.session();

        let err = s.create_node("/hosts/a:1", b"0", NodeKind::Persistent).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound("/hosts".into()));

        s.create_node("/hosts", b"", NodeKind::Persistent).await.unwrap();
        let err = s.create_node("/hosts", b"", NodeKind::Persistent).await.unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists("/hosts".into()));
    }

    #[tokio::test]
    async fn test_list_children_only_direct() {
        let store = MemoryStore::new();
        let s = store.session();
        s.create_node("/hosts", b"", NodeKind::Persistent).await.unwrap();
        s.create_node("/hostsx", b"", NodeKind::Persistent).await.unwrap();
        s.create_node("/hosts/a:1", b"0", NodeKind::Persistent).await.unwrap();
        s.create_node("/hosts/a:1/meta", b"", NodeKind::Persistent).await.unwrap();
        s.create_node("/hosts/b:2", b"0", NodeKind::Persistent).await.unwrap();

        let children = s.list_children("/hosts").await.unwrap();
        assert_eq!(children, vec!["a:1".to_string(), "b:2".to_string()]);

        let root = s.list_children("/").await.unwrap();
        assert_eq!(root, vec!["hosts".to_string(), "hostsx".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_checks_version() {
        let store = MemoryStore::new();
        let s = store.session();
        s.create_node("/n", b"0", NodeKind::Persistent).await.unwrap();

        let err = s.delete_node("/n", Version(3)).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict(_)));

        s.delete_node("/n", Version(0)).await.unwrap();
        let err = s.delete_node("/n", Version(0)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_refuses_parent_with_children() {
        let store = MemoryStore::new();
        let s = store.session();
        s.create_node("/n", b"", NodeKind::Persistent).await.unwrap();
        s.create_node("/n/c", b"0", NodeKind::Persistent).await.unwrap();

        let err = s.delete_node("/n", Version(0)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotEmpty(ref p) if p == "/n"));
        assert!(!err.is_unavailable());

        s.delete_node("/n/c", Version(0)).await.unwrap();
        s.delete_node("/n", Version(0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_outage_injection() {
        let store = MemoryStore::new();
        let s = store.session();
        store.set_available(false);
        assert!(s.exists("/").await.unwrap_err().is_unavailable());
        store.set_available(true);
        assert!(s.list_children("/").await.unwrap().is_empty());
    }
}
