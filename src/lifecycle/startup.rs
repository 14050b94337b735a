//! Startup orchestration.
//!
//! # Responsibilities
//! - Open the coordination store selected by configuration
//! - Bound every store call with the configured deadline
//! - Make sure the targets directory exists before traffic is accepted
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{ConfigError, CoordinationConfig, StoreBackend};
use crate::membership::RegistrationError;
use crate::registry::{ensure_node, CoordinationStore, MemoryStore, StoreError, TimeoutStore};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),

    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] io::Error),
}

/// Wrap `store` so that no call outlives the configured operation timeout.
pub fn bounded(store: Arc<dyn CoordinationStore>, config: &CoordinationConfig) -> Arc<dyn CoordinationStore> {
    Arc::new(TimeoutStore::new(
        store,
        Duration::from_millis(config.operation_timeout_ms),
    ))
}

/// Open a session on the configured coordination store.
pub async fn open_store(config: &CoordinationConfig) -> Result<Arc<dyn CoordinationStore>, StartupError> {
    let store: Arc<dyn CoordinationStore> = match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-process coordination store; only targets in this process are visible");
            Arc::new(MemoryStore::new().session())
        }
        StoreBackend::Zookeeper => connect_zookeeper(config).await?,
    };
    Ok(bounded(store, config))
}

#[cfg(feature = "zookeeper")]
async fn connect_zookeeper(config: &CoordinationConfig) -> Result<Arc<dyn CoordinationStore>, StartupError> {
    use crate::resilience::timeouts::with_deadline;

    let deadline = Duration::from_millis(config.operation_timeout_ms);
    let store = with_deadline(
        deadline,
        crate::registry::zookeeper::ZooKeeperStore::connect(&config.connect),
    )
    .await
    .map_err(StoreError::Timeout)??;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "zookeeper"))]
async fn connect_zookeeper(config: &CoordinationConfig) -> Result<Arc<dyn CoordinationStore>, StartupError> {
    Err(StoreError::Unavailable(format!(
        "cannot reach {}: built without the `zookeeper` feature",
        config.connect
    ))
    .into())
}

/// Create the targets directory if nobody has yet.
pub async fn bootstrap(store: &dyn CoordinationStore, config: &CoordinationConfig) -> Result<(), StartupError> {
    ensure_node(store, &config.targets_path).await?;
    tracing::info!(path = %config.targets_path, "Targets directory ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let store = MemoryStore::new();
        let session: Arc<dyn CoordinationStore> = Arc::new(store.session());
        let config = CoordinationConfig::default();

        bootstrap(session.as_ref(), &config).await.unwrap();
        bootstrap(session.as_ref(), &config).await.unwrap();
        assert!(session.exists("/hosts").await.unwrap().is_some());
        assert_eq!(store.node_count(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_fails_when_store_down() {
        let store = MemoryStore::new();
        store.set_available(false);
        let session: Arc<dyn CoordinationStore> = Arc::new(store.session());
        let err = bootstrap(session.as_ref(), &CoordinationConfig::default()).await.unwrap_err();
        assert!(matches!(err, StartupError::Store(ref e) if e.is_unavailable()));
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let store = open_store(&CoordinationConfig::default()).await.unwrap();
        bootstrap(store.as_ref(), &CoordinationConfig::default()).await.unwrap();
        assert!(store.list_children("/hosts").await.unwrap().is_empty());
    }

    #[cfg(not(feature = "zookeeper"))]
    #[tokio::test]
    async fn test_zookeeper_requires_feature() {
        let config = CoordinationConfig {
            backend: StoreBackend::Zookeeper,
            ..CoordinationConfig::default()
        };
        assert!(matches!(open_store(&config).await, Err(StartupError::Store(_))));
    }
}
