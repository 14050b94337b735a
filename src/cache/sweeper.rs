//! Background eviction of expired cache entries.

use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::cache::response_cache::ResponseCache;

/// Periodically purge expired entries so memory stays bounded even when
/// nobody reads them again. Stops when `shutdown` fires.
pub fn spawn_sweeper(
    cache: ResponseCache,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval = ?interval, "Cache sweeper starting");
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.purge_expired_at(Instant::now());
                    if removed > 0 {
                        tracing::debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, CachedResponse};
    use axum::body::Bytes;
    use axum::http::{HeaderMap, Method, StatusCode};

    #[tokio::test]
    async fn test_sweeper_evicts_without_reads() {
        let cache = ResponseCache::new(Duration::from_millis(20));
        cache.insert(
            CacheKey::new(Method::GET, "/x"),
            CachedResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"x"),
            },
            Duration::from_millis(20),
        );

        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_sweeper(cache.clone(), Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.is_empty());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
