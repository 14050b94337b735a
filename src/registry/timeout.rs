//! Deadline decorator for coordination store calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{CoordinationStore, NodeKind, Stat, StoreError, Version};
use crate::resilience::timeouts::with_deadline;

/// Wraps a store so that every call fails with `StoreError::Timeout`
/// instead of hanging past `deadline`.
#[derive(Debug, Clone)]
pub struct TimeoutStore {
    inner: Arc<dyn CoordinationStore>,
    deadline: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn CoordinationStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl CoordinationStore for TimeoutStore {
    async fn exists(&self, path: &str) -> Result<Option<Stat>, StoreError> {
        with_deadline(self.deadline, self.inner.exists(path))
            .await
            .map_err(StoreError::Timeout)?
    }

    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat), StoreError> {
        with_deadline(self.deadline, self.inner.get_data(path))
            .await
            .map_err(StoreError::Timeout)?
    }

    async fn set_data(&self, path: &str, data: &[u8], expected: Version) -> Result<Stat, StoreError> {
        with_deadline(self.deadline, self.inner.set_data(path, data, expected))
            .await
            .map_err(StoreError::Timeout)?
    }

    async fn create_node(&self, path: &str, data: &[u8], kind: NodeKind) -> Result<(), StoreError> {
        with_deadline(self.deadline, self.inner.create_node(path, data, kind))
            .await
            .map_err(StoreError::Timeout)?
    }

    async fn delete_node(&self, path: &str, expected: Version) -> Result<(), StoreError> {
        with_deadline(self.deadline, self.inner.delete_node(path, expected))
            .await
            .map_err(StoreError::Timeout)?
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        with_deadline(self.deadline, self.inner.list_children(path))
            .await
            .map_err(StoreError::Timeout)?
    }
}
