//! Coordination store client contract.
//!
//! # Data Flow
//! ```text
//! membership agent ──┐
//! target directory ──┼─▶ CoordinationStore (trait object)
//! load accounting  ──┘        │
//!                             ├─▶ timeout.rs   (deadline on every call)
//!                             ├─▶ memory.rs    (in-process store, sessions)
//!                             └─▶ zookeeper.rs (feature = "zookeeper")
//! ```
//!
//! # Design Decisions
//! - The core depends only on the six operations below, never on a product API
//! - Every mutation is guarded by a `Version`; stale versions are rejected
//! - Ephemeral nodes live exactly as long as the session that created them

pub mod memory;
pub mod timeout;
#[cfg(feature = "zookeeper")]
pub mod zookeeper;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{MemorySession, MemoryStore};
pub use timeout::TimeoutStore;

/// Opaque version token returned by reads and required by writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub i64);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Node metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub version: Version,
}

/// Persistence kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Survives the session that created it.
    Persistent,
    /// Removed by the store when the creating session ends.
    Ephemeral,
}

/// Errors reported by a coordination store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("node not found: {0}")]
    NotFound(String),

    #[error("node already exists: {0}")]
    AlreadyExists(String),

    /// The supplied version no longer matches the node.
    #[error("version conflict on {0}")]
    VersionConflict(String),

    #[error("node has children: {0}")]
    NotEmpty(String),

    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("coordination store call timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// True for failures of the store itself rather than of the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Capability contract consumed by the proxy and the membership agent.
#[async_trait]
pub trait CoordinationStore: Send + Sync + fmt::Debug {
    /// Returns the node's stat, or `None` when it does not exist.
    async fn exists(&self, path: &str) -> Result<Option<Stat>, StoreError>;

    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat), StoreError>;

    /// Compare-and-swap write.
    async fn set_data(&self, path: &str, data: &[u8], expected: Version) -> Result<Stat, StoreError>;

    async fn create_node(&self, path: &str, data: &[u8], kind: NodeKind) -> Result<(), StoreError>;

    async fn delete_node(&self, path: &str, expected: Version) -> Result<(), StoreError>;

    /// Names (not paths) of the direct children of `path`.
    async fn list_children(&self, path: &str) -> Result<Vec<String>, StoreError>;
}

/// Path of the node advertising `endpoint` under the targets directory.
pub fn target_path(dir: &str, endpoint: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), endpoint)
}

/// Create a persistent node unless it is already there.
///
/// Losing a creation race to another process counts as success.
pub async fn ensure_node(store: &dyn CoordinationStore, path: &str) -> Result<(), StoreError> {
    if store.exists(path).await?.is_some() {
        return Ok(());
    }
    match store.create_node(path, b"", NodeKind::Persistent).await {
        Ok(()) => {
            tracing::info!(path = %path, "Created coordination directory");
            Ok(())
        }
        Err(StoreError::AlreadyExists(_)) => Ok(()),
        Err(e) => Err(e),
    }
}
