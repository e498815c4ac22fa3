//! Content caching for storage backends.
//!
//! The cache is a pure read-through accelerator keyed by resolved physical
//! path: it is never consulted on write, never the source of truth, and a
//! read that misses must always fall back to the backend. Entries are not
//! invalidated by `put`/`delete`; a cached read can go stale until the
//! entry is evicted.

mod tinylfu;

pub use tinylfu::TinyLfuCache;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether content caching is enabled at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Aggregate cost budget in bytes across all cached blobs.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_max_bytes() -> u64 {
    256 * 1024 * 1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl CacheConfig {
    /// Build the configured cache implementation.
    pub fn build(&self) -> Arc<dyn ContentCache> {
        if self.enabled {
            Arc::new(TinyLfuCache::new(self.max_bytes))
        } else {
            Arc::new(NoopCache::new())
        }
    }
}

/// Trait for content caches.
///
/// Implementations are safe for unlimited concurrent `get`/`add` without
/// caller-side locking.
#[async_trait]
pub trait ContentCache: Send + Sync {
    /// Look up a cached blob. Counts a hit or a miss.
    async fn get(&self, key: &str) -> Option<Bytes>;

    /// Offer a blob to the cache, costed at `value.len()` bytes.
    ///
    /// Returns whether the entry was accepted for admission. Admission and
    /// eviction settle asynchronously: a `true` return does not guarantee
    /// the entry is resident yet. Call [`sync`](ContentCache::sync) when a
    /// deterministic view is required.
    async fn add(&self, key: &str, value: Bytes) -> bool;

    /// Number of `get` calls answered from the cache.
    fn hits(&self) -> u64;

    /// Number of `get` calls that fell through to the backend.
    fn misses(&self) -> u64;

    /// Wait until pending admissions and evictions have settled.
    async fn sync(&self);

    /// Drop all entries and stop accepting adds.
    fn close(&self);
}

/// Always-miss cache for deployments that disable caching entirely.
///
/// `add` is zero-cost and rejects every entry; `get` always misses.
#[derive(Debug, Default)]
pub struct NoopCache {
    misses: AtomicU64,
}

impl NoopCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentCache for NoopCache {
    async fn get(&self, _key: &str) -> Option<Bytes> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn add(&self, _key: &str, _value: Bytes) -> bool {
        false
    }

    fn hits(&self) -> u64 {
        0
    }

    fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    async fn sync(&self) {}

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_cache_never_stores() {
        let cache = NoopCache::new();

        assert!(!cache.add("k", Bytes::from("value")).await);
        assert!(cache.get("k").await.is_none());

        assert_eq!(cache.hits(), 0);
        assert_eq!(cache.misses(), 1);
    }

    #[tokio::test]
    async fn test_disabled_config_builds_noop() {
        let config = CacheConfig {
            enabled: false,
            max_bytes: 1024,
        };
        let cache = config.build();

        assert!(!cache.add("k", Bytes::from("v")).await);
        assert!(cache.get("k").await.is_none());
    }
}
