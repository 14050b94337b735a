//! Target directory.
//!
//! # Responsibilities
//! - List the registered endpoints
//! - Read every endpoint's counter and version concurrently
//! - Produce the least-loaded-first candidate list for one request

use std::sync::Arc;

use futures_util::future::join_all;

use crate::load_balancer::target::{CandidateList, Target};
use crate::registry::{target_path, CoordinationStore, StoreError};

/// Read-side view of the targets directory.
#[derive(Debug, Clone)]
pub struct TargetDirectory {
    store: Arc<dyn CoordinationStore>,
    dir: String,
}

impl TargetDirectory {
    pub fn new(store: Arc<dyn CoordinationStore>, dir: impl Into<String>) -> Self {
        Self {
            store,
            dir: dir.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.dir
    }

    /// Snapshot the directory as a candidate list.
    ///
    /// Children that vanish or hold garbage between listing and reading are
    /// left out. Only a failure to list the directory itself is an error.
    pub async fn list_targets(&self) -> Result<CandidateList, StoreError> {
        let children = self.store.list_children(&self.dir).await?;

        let reads = children.iter().map(|endpoint| self.read_target(endpoint));
        let targets: Vec<Target> = join_all(reads).await.into_iter().flatten().collect();

        tracing::trace!(
            listed = children.len(),
            readable = targets.len(),
            "Directory snapshot"
        );
        Ok(CandidateList::new(targets))
    }

    async fn read_target(&self, endpoint: &str) -> Option<Target> {
        let path = target_path(&self.dir, endpoint);
        match self.store.get_data(&path).await {
            Ok((data, stat)) => {
                let target = Target::from_node(endpoint, &data, stat);
                if target.is_none() {
                    tracing::warn!(path = %path, "Ignoring target with malformed load counter");
                }
                target
            }
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(path = %path, "Target vanished before it could be read");
                None
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to read target");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryStore, NodeKind, Version};

    async fn seeded() -> (MemoryStore, Arc<dyn CoordinationStore>) {
        let store = MemoryStore::new();
        let session = store.session();
        session.create_node("/hosts", b"", NodeKind::Persistent).await.unwrap();
        (store, Arc::new(session))
    }

    #[tokio::test]
    async fn test_empty_directory_is_not_an_error() {
        let (_store, session) = seeded().await;
        let dir = TargetDirectory::new(session, "/hosts");
        assert!(dir.list_targets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sorted_with_versions() {
        let (_store, session) = seeded().await;
        session.create_node("/hosts/10.0.0.1:9001", b"0", NodeKind::Ephemeral).await.unwrap();
        session.create_node("/hosts/10.0.0.1:9002", b"0", NodeKind::Ephemeral).await.unwrap();
        // Bump 9001 to count 3, version 3
        for i in 0..3u64 {
            session
                .set_data("/hosts/10.0.0.1:9001", (i + 1).to_string().as_bytes(), Version(i as i64))
                .await
                .unwrap();
        }

        let dir = TargetDirectory::new(session, "/hosts");
        let list = dir.list_targets().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(0).unwrap(), &Target::new("10.0.0.1:9002", 0, Version(0)));
        assert_eq!(list.get(1).unwrap(), &Target::new("10.0.0.1:9001", 3, Version(3)));
    }

    #[tokio::test]
    async fn test_malformed_payload_excluded() {
        let (_store, session) = seeded().await;
        session.create_node("/hosts/a:1", b"zero", NodeKind::Persistent).await.unwrap();
        session.create_node("/hosts/b:2", b"4", NodeKind::Persistent).await.unwrap();

        let dir = TargetDirectory::new(session, "/hosts");
        let list = dir.list_targets().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(0).unwrap().endpoint, "b:2");
    }

    #[tokio::test]
    async fn test_listing_failure_propagates() {
        let (store, session) = seeded().await;
        let dir = TargetDirectory::new(session, "/hosts");
        store.set_available(false);
        assert!(dir.list_targets().await.unwrap_err().is_unavailable());
    }

    /// Lists a child that is already gone by the time it is read.
    #[derive(Debug)]
    struct VanishingChild(crate::registry::MemorySession);

    #[async_trait::async_trait]
    impl CoordinationStore for VanishingChild {
        async fn exists(&self, p: &str) -> Result<Option<crate::registry::Stat>, StoreError> {
            self.0.exists(p).await
        }
        async fn get_data(&self, p: &str) -> Result<(Vec<u8>, crate::registry::Stat), StoreError> {
            self.0.get_data(p).await
        }
        async fn set_data(&self, p: &str, d: &[u8], v: Version) -> Result<crate::registry::Stat, StoreError> {
            self.0.set_data(p, d, v).await
        }
        async fn create_node(&self, p: &str, d: &[u8], k: NodeKind) -> Result<(), StoreError> {
            self.0.create_node(p, d, k).await
        }
        async fn delete_node(&self, p: &str, v: Version) -> Result<(), StoreError> {
            self.0.delete_node(p, v).await
        }
        async fn list_children(&self, p: &str) -> Result<Vec<String>, StoreError> {
            let mut children = self.0.list_children(p).await?;
            children.push("10.9.9.9:1".to_string());
            Ok(children)
        }
    }

    #[tokio::test]
    async fn test_vanished_child_skipped() {
        let store = MemoryStore::new();
        let session = store.session();
        session.create_node("/hosts", b"", NodeKind::Persistent).await.unwrap();
        session.create_node("/hosts/a:1", b"2", NodeKind::Persistent).await.unwrap();

        let dir = TargetDirectory::new(Arc::new(VanishingChild(session)), "/hosts");
        let list = dir.list_targets().await.unwrap();
        let endpoints: Vec<_> = list.iter().map(|t| t.endpoint.clone()).collect();
        assert_eq!(endpoints, vec!["a:1".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let store = MemoryStore::new();
        let dir = TargetDirectory::new(Arc::new(store.session()), "/hosts");
        assert!(matches!(dir.list_targets().await, Err(StoreError::NotFound(_))));
    }
}
