//! Self-registration of a backend in the targets directory.
//!
//! # Responsibilities
//! - Make sure the targets directory exists
//! - Remove a node left behind by a previous instance on the same endpoint
//! - Advertise the endpoint with an ephemeral node holding a zero counter
//!
//! # Design Decisions
//! - A live process already owning the endpoint is fatal, never retried
//! - The node lives exactly as long as the agent's store session

use std::sync::Arc;

use thiserror::Error;

use crate::load_balancer::target::encode_count;
use crate::registry::{ensure_node, target_path, CoordinationStore, NodeKind, StoreError};

/// Stale-node removal races with proxies bumping the old counter.
const CLEANUP_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("endpoint {0} is already registered by a live process")]
    EndpointTaken(String),

    #[error("could not remove stale registration for {endpoint}: {source}")]
    Cleanup {
        endpoint: String,
        #[source]
        source: StoreError,
    },

    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),
}

/// Proof of a live registration.
///
/// Holds the store session that owns the ephemeral node, so the
/// registration lasts at least as long as this handle.
#[derive(Debug, Clone)]
pub struct Registration {
    endpoint: String,
    path: String,
    _session: Arc<dyn CoordinationStore>,
}

impl Registration {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Registers endpoints under one targets directory.
#[derive(Debug, Clone)]
pub struct MembershipAgent {
    store: Arc<dyn CoordinationStore>,
    dir: String,
}

impl MembershipAgent {
    pub fn new(store: Arc<dyn CoordinationStore>, dir: &str) -> Self {
        Self {
            store,
            dir: dir.to_string(),
        }
    }

    /// Advertise `endpoint` ("host:port") to the proxies.
    pub async fn register(&self, endpoint: &str) -> Result<Registration, RegistrationError> {
        if endpoint.is_empty() || endpoint.contains('/') {
            return Err(RegistrationError::InvalidEndpoint(endpoint.to_string()));
        }

        ensure_node(self.store.as_ref(), &self.dir).await?;

        let path = target_path(&self.dir, endpoint);
        self.remove_stale(endpoint, &path).await?;

        match self
            .store
            .create_node(&path, &encode_count(0), NodeKind::Ephemeral)
            .await
        {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => {
                return Err(RegistrationError::EndpointTaken(endpoint.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(endpoint = %endpoint, path = %path, "Registered target");
        Ok(Registration {
            endpoint: endpoint.to_string(),
            path,
            _session: self.store.clone(),
        })
    }

    async fn remove_stale(&self, endpoint: &str, path: &str) -> Result<(), RegistrationError> {
        for _ in 0..CLEANUP_ATTEMPTS {
            let stat = match self.store.exists(path).await? {
                Some(stat) => stat,
                None => return Ok(()),
            };
            match self.store.delete_node(path, stat.version).await {
                Ok(()) => {
                    tracing::info!(endpoint = %endpoint, version = %stat.version, "Removed stale registration");
                    return Ok(());
                }
                Err(StoreError::NotFound(_)) => return Ok(()),
                Err(StoreError::VersionConflict(_)) => {
                    tracing::debug!(endpoint = %endpoint, "Stale registration changed during cleanup, re-reading");
                }
                Err(source) => {
                    return Err(RegistrationError::Cleanup {
                        endpoint: endpoint.to_string(),
                        source,
                    })
                }
            }
        }
        Err(RegistrationError::Cleanup {
            endpoint: endpoint.to_string(),
            source: StoreError::VersionConflict(path.to_string()),
        })
    }
}
