//! TTL-keyed store of recent backend responses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use dashmap::DashMap;

use crate::cache::key::CacheKey;
use crate::observability::metrics;

/// The parts of a backend response worth replaying.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A cached response plus its freshness window.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: CachedResponse,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Readable while `now - inserted_at < ttl`.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }
}

/// Process-local response cache shared by all in-flight requests.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<CachedResponse> {
        self.lookup_at(key, Instant::now())
    }

    /// Look up `key` as of `now`. Expired entries read as absent and are dropped.
    pub fn lookup_at(&self, key: &CacheKey, now: Instant) -> Option<CachedResponse> {
        {
            let entry = self.entries.get(key)?;
            if entry.is_fresh_at(now) {
                return Some(entry.response.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| !entry.is_fresh_at(now));
        None
    }

    pub fn insert(&self, key: CacheKey, response: CachedResponse, ttl: Duration) {
        self.insert_at(key, response, ttl, Instant::now());
    }

    pub fn insert_at(&self, key: CacheKey, response: CachedResponse, ttl: Duration, now: Instant) {
        tracing::debug!(key = %key, ttl = ?ttl, bytes = response.body.len(), "Caching response");
        self.entries.insert(
            key,
            CacheEntry {
                response,
                inserted_at: now,
                ttl,
            },
        );
        metrics::record_cache_size(self.entries.len());
    }

    /// Drop every entry that has expired as of `now`. Returns how many went.
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh_at(now));
        let removed = before.saturating_sub(self.entries.len());
        metrics::record_cache_size(self.entries.len());
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
