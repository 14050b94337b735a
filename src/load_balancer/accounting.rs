//! Load accounting policies.
//!
//! # Responsibilities
//! - Claim a unit of load on a target before a request is forwarded to it
//! - Optionally give the unit back once the request completes
//!
//! # Design Decisions
//! - Claims are a single CAS write guarded by the snapshot's version
//! - A conflict means another writer got there first; the caller moves on
//!   to the next candidate instead of re-reading and retrying here
//! - The dispatcher only sees the `LoadAccounting` trait, so the counter
//!   policy can change without touching failover

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::load_balancer::target::{decode_count, encode_count, Target};
use crate::registry::{target_path, CoordinationStore, StoreError, Version};

/// Result of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Counter incremented; the node is now at `version`.
    Claimed { version: Version },
    /// The node changed since the snapshot was taken.
    Conflict,
}

/// Counter maintenance policy.
#[async_trait]
pub trait LoadAccounting: Send + Sync + fmt::Debug {
    /// Record one unit of load on `target`.
    async fn claim(&self, target: &Target) -> Result<Claim, StoreError>;

    /// Called once a claimed request has completed.
    async fn release(&self, _target: &Target) {}

    /// Whether `release` does anything; callers skip tracking claims otherwise.
    fn releases(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}

/// Which policy the proxy runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Counters only ever grow.
    #[default]
    Cumulative,
    /// Counters are decremented when a request completes.
    InFlight,
}

/// Build the accounting implementation for `policy`.
pub fn accounting_for(
    policy: LoadPolicy,
    store: Arc<dyn CoordinationStore>,
    dir: &str,
) -> Arc<dyn LoadAccounting> {
    match policy {
        LoadPolicy::Cumulative => Arc::new(CumulativeLoad::new(store, dir)),
        LoadPolicy::InFlight => Arc::new(InFlightLoad::new(store, dir)),
    }
}

async fn cas_increment(
    store: &dyn CoordinationStore,
    dir: &str,
    target: &Target,
) -> Result<Claim, StoreError> {
    let path = target_path(dir, &target.endpoint);
    let next = target.load_count.saturating_add(1);
    match store.set_data(&path, &encode_count(next), target.version).await {
        Ok(stat) => Ok(Claim::Claimed {
            version: stat.version,
        }),
        Err(StoreError::VersionConflict(_)) => Ok(Claim::Conflict),
        Err(e) => Err(e),
    }
}

/// Historical usage counter: incremented on every claim, never decremented.
#[derive(Debug, Clone)]
pub struct CumulativeLoad {
    store: Arc<dyn CoordinationStore>,
    dir: String,
}

impl CumulativeLoad {
    pub fn new(store: Arc<dyn CoordinationStore>, dir: &str) -> Self {
        Self {
            store,
            dir: dir.to_string(),
        }
    }
}

#[async_trait]
impl LoadAccounting for CumulativeLoad {
    async fn claim(&self, target: &Target) -> Result<Claim, StoreError> {
        cas_increment(self.store.as_ref(), &self.dir, target).await
    }

    fn name(&self) -> &'static str {
        "cumulative"
    }
}

const RELEASE_ATTEMPTS: u32 = 5;

/// Approximates live concurrency: the claim is undone on completion.
#[derive(Debug, Clone)]
pub struct InFlightLoad {
    store: Arc<dyn CoordinationStore>,
    dir: String,
}

impl InFlightLoad {
    pub fn new(store: Arc<dyn CoordinationStore>, dir: &str) -> Self {
        Self {
            store,
            dir: dir.to_string(),
        }
    }
}

#[async_trait]
impl LoadAccounting for InFlightLoad {
    async fn claim(&self, target: &Target) -> Result<Claim, StoreError> {
        cas_increment(self.store.as_ref(), &self.dir, target).await
    }

    async fn release(&self, target: &Target) {
        let path = target_path(&self.dir, &target.endpoint);
        // The decrement has no snapshot to lean on, so it re-reads on conflict.
        for _ in 0..RELEASE_ATTEMPTS {
            let (data, stat) = match self.store.get_data(&path).await {
                Ok(read) => read,
                Err(StoreError::NotFound(_)) => return,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Release skipped, read failed");
                    return;
                }
            };
            let count = match decode_count(&data) {
                Some(0) | None => return,
                Some(count) => count,
            };
            match self.store.set_data(&path, &encode_count(count - 1), stat.version).await {
                Ok(_) => return,
                Err(StoreError::VersionConflict(_)) => continue,
                Err(StoreError::NotFound(_)) => return,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Release skipped, write failed");
                    return;
                }
            }
        }
        tracing::warn!(path = %path, attempts = RELEASE_ATTEMPTS, "Release abandoned under contention");
    }

    fn releases(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "in_flight"
    }
}
