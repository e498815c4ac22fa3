//! Cost-bounded frequency-aware cache built on moka.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;

use super::ContentCache;

/// Content cache with a byte-cost budget and W-TinyLFU admission.
///
/// Each entry is weighed at its blob length, so the budget bounds resident
/// bytes rather than entry count. Under pressure a new entry is only kept
/// when its estimated access frequency beats what it would evict, which
/// keeps a one-shot bulk read from flushing the hot working set.
pub struct TinyLfuCache {
    inner: Cache<String, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
    closed: AtomicBool,
}

impl TinyLfuCache {
    /// Create a cache with the given cost budget in bytes.
    pub fn new(max_bytes: u64) -> Self {
        let inner = Cache::builder()
            .weigher(|_key: &String, value: &Bytes| {
                value.len().try_into().unwrap_or(u32::MAX)
            })
            .max_capacity(max_bytes)
            .build();

        Self {
            inner,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether the key is currently resident. Only meaningful after
    /// [`sync`](ContentCache::sync); admission is asynchronous.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Resident cost in bytes, as of the last settled state.
    pub fn weighted_size(&self) -> u64 {
        self.inner.weighted_size()
    }
}

#[async_trait]
impl ContentCache for TinyLfuCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        if self.closed.load(Ordering::Acquire) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match self.inner.get(key).await {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn add(&self, key: &str, value: Bytes) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        self.inner.insert(key.to_string(), value).await;
        true
    }

    fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_then_get() {
        let cache = TinyLfuCache::new(1024 * 1024);

        assert!(cache.add("a", Bytes::from("alpha")).await);
        cache.sync().await;

        assert_eq!(cache.get("a").await, Some(Bytes::from("alpha")));
        assert!(cache.get("b").await.is_none());
    }

    #[tokio::test]
    async fn test_hit_miss_accounting() {
        let cache = TinyLfuCache::new(1024);
        cache.add("a", Bytes::from("x")).await;
        cache.sync().await;

        let gets = 10;
        for i in 0..gets {
            let key = if i % 2 == 0 { "a" } else { "absent" };
            cache.get(key).await;
        }

        assert_eq!(cache.hits() + cache.misses(), gets);
        assert_eq!(cache.hits(), 5);
        assert_eq!(cache.misses(), 5);
    }

    #[tokio::test]
    async fn test_budget_bounds_resident_bytes() {
        let cache = TinyLfuCache::new(64);

        for i in 0..8 {
            cache
                .add(&format!("k{}", i), Bytes::from(vec![0u8; 32]))
                .await;
        }
        cache.sync().await;

        assert!(cache.weighted_size() <= 64);
    }

    #[tokio::test]
    async fn test_oversized_entry_is_not_resident() {
        let cache = TinyLfuCache::new(16);

        cache.add("big", Bytes::from(vec![0u8; 1024])).await;
        cache.sync().await;

        assert!(!cache.contains("big"));
    }

    #[tokio::test]
    async fn test_close_drops_entries_and_rejects_adds() {
        let cache = TinyLfuCache::new(1024);
        cache.add("a", Bytes::from("x")).await;
        cache.sync().await;

        cache.close();
        assert!(cache.get("a").await.is_none());
        assert!(!cache.add("b", Bytes::from("y")).await);
    }
}
