//! ZooKeeper-backed coordination store.
//!
//! Ephemeral nodes map onto ZooKeeper ephemeral znodes, so a crashed backend
//! disappears from the directory once its session times out server-side.

use std::fmt;

use async_trait::async_trait;
use zookeeper_client as zk;

use super::{CoordinationStore, NodeKind, Stat, StoreError, Version};

pub struct ZooKeeperStore {
    client: zk::Client,
    cluster: String,
}

impl ZooKeeperStore {
    /// Open a session against `cluster` (e.g. "127.0.0.1:2181").
    pub async fn connect(cluster: &str) -> Result<Self, StoreError> {
        let client = zk::Client::connect(cluster)
            .await
            .map_err(|e| StoreError::Unavailable(format!("connect {}: {}", cluster, e)))?;
        tracing::info!(cluster = %cluster, "ZooKeeper session established");
        Ok(Self {
            client,
            cluster: cluster.to_string(),
        })
    }
}

impl fmt::Debug for ZooKeeperStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZooKeeperStore").field("cluster", &self.cluster).finish()
    }
}

fn map_error(path: &str, err: zk::Error) -> StoreError {
    match err {
        zk::Error::NoNode => StoreError::NotFound(path.to_string()),
        zk::Error::NodeExists => StoreError::AlreadyExists(path.to_string()),
        zk::Error::BadVersion => StoreError::VersionConflict(path.to_string()),
        zk::Error::NotEmpty => StoreError::NotEmpty(path.to_string()),
        other => StoreError::Unavailable(other.to_string()),
    }
}

fn to_stat(stat: &zk::Stat) -> Stat {
    Stat {
        version: Version(i64::from(stat.version)),
    }
}

fn zk_version(path: &str, version: Version) -> Result<i32, StoreError> {
    i32::try_from(version.0).map_err(|_| StoreError::VersionConflict(path.to_string()))
}

#[async_trait]
impl CoordinationStore for ZooKeeperStore {
    async fn exists(&self, path: &str) -> Result<Option<Stat>, StoreError> {
        let stat = self.client.check_stat(path).await.map_err(|e| map_error(path, e))?;
        Ok(stat.as_ref().map(to_stat))
    }

    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat), StoreError> {
        let (data, stat) = self.client.get_data(path).await.map_err(|e| map_error(path, e))?;
        Ok((data, to_stat(&stat)))
    }

    async fn set_data(&self, path: &str, data: &[u8], expected: Version) -> Result<Stat, StoreError> {
        let version = zk_version(path, expected)?;
        let stat = self
            .client
            .set_data(path, data, Some(version))
            .await
            .map_err(|e| map_error(path, e))?;
        Ok(to_stat(&stat))
    }

    async fn create_node(&self, path: &str, data: &[u8], kind: NodeKind) -> Result<(), StoreError> {
        let mode = match kind {
            NodeKind::Persistent => zk::CreateMode::Persistent,
            NodeKind::Ephemeral => zk::CreateMode::Ephemeral,
        };
        let options = mode.with_acls(zk::Acls::anyone_all());
        self.client
            .create(path, data, &options)
            .await
            .map(|_| ())
            .map_err(|e| map_error(path, e))
    }

    async fn delete_node(&self, path: &str, expected: Version) -> Result<(), StoreError> {
        let version = zk_version(path, expected)?;
        self.client
            .delete(path, Some(version))
            .await
            .map_err(|e| map_error(path, e))
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        self.client.list_children(path).await.map_err(|e| map_error(path, e))
    }
}
