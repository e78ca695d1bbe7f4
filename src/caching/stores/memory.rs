//! # In-Memory Cache Store
//!
//! Process-local cache used when no shared store is configured. Entries are
//! kept in a sharded concurrent map; expiry is checked lazily on read, and a
//! capacity bound is enforced on write.

use super::{CacheEntry, CacheStore, CacheStoreStats};
use crate::caching::CacheResult;
use crate::core::clock::{SharedClock, SystemClock};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// In-memory cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryCacheConfig {
    /// Maximum number of entries
    pub max_entries: usize,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self { max_entries: 10_000 }
    }
}

/// In-memory cache implementation
pub struct InMemoryCache {
    /// Configuration
    config: InMemoryCacheConfig,

    /// Cache entries storage
    entries: DashMap<String, CacheEntry>,

    /// Time source for expiry checks
    clock: SharedClock,

    /// Atomic counters for statistics
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_cleanups: AtomicU64,
}

impl InMemoryCache {
    /// Create a new in-memory cache on the system clock
    pub fn new(config: InMemoryCacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a new in-memory cache on a custom clock
    pub fn with_clock(config: InMemoryCacheConfig, clock: SharedClock) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired_cleanups: AtomicU64::new(0),
        }
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            self.expired_cleanups.fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Purged {} expired cache entries", removed);
        }
        removed
    }

    /// Make room for one more entry when the cache is at capacity
    fn evict_if_needed(&self, now: Instant) {
        if self.entries.len() < self.config.max_entries {
            return;
        }

        if self.purge_expired() > 0 && self.entries.len() < self.config.max_entries {
            return;
        }

        // Still full: drop the entry that would have expired soonest
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().ttl_at(now))
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            if self.entries.remove(&key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Evicted cache entry {} to stay within {} entries", key, self.config.max_entries);
            }
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = self.clock.now();

        // The map guard must be released before an expired entry is removed
        let lookup = self
            .entries
            .get(key)
            .map(|entry| (!entry.is_expired_at(now)).then(|| entry.value.clone()));

        match lookup {
            Some(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Some(None) => {
                if self.entries.remove_if(key, |_, entry| entry.is_expired_at(now)).is_some() {
                    self.expired_cleanups.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let now = self.clock.now();

        if !self.entries.contains_key(key) {
            self.evict_if_needed(now);
        }

        self.entries
            .insert(key.to_string(), CacheEntry::new(value.to_vec(), ttl, now));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn clear(&self) -> CacheResult<()> {
        let entry_count = self.entries.len();
        self.entries.clear();

        info!("Cleared {} entries from in-memory cache", entry_count);
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStoreStats> {
        Ok(CacheStoreStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_cleanups: self.expired_cleanups.load(Ordering::Relaxed),
            errors: 0,
        })
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;

    fn cache_with_clock(max_entries: usize) -> (InMemoryCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = InMemoryCache::with_clock(InMemoryCacheConfig { max_entries }, clock.clone());
        (cache, clock)
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let cache = InMemoryCache::new(InMemoryCacheConfig::default());

        let key = "pokemon/25";
        let value = br#"{"id":25,"name":"pikachu"}"#;

        cache.set(key, value, Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(key).await.unwrap(), Some(value.to_vec()));

        assert!(cache.delete(key).await.unwrap());
        assert!(!cache.delete(key).await.unwrap());
        assert_eq!(cache.get(key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let (cache, clock) = cache_with_clock(100);
        let ttl = Duration::from_secs(10);

        cache.set("item/4", b"poke-ball", ttl).await.unwrap();

        // Readable right up to the TTL boundary
        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.get("item/4").await.unwrap(), Some(b"poke-ball".to_vec()));

        // Absent strictly after it
        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("item/4").await.unwrap(), None);

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.expired_cleanups, 1);
    }

    #[tokio::test]
    async fn test_overwrite_refreshes_ttl() {
        let (cache, clock) = cache_with_clock(100);

        cache.set("type/13", b"old", Duration::from_secs(5)).await.unwrap();
        clock.advance(Duration::from_secs(4));
        cache.set("type/13", b"new", Duration::from_secs(5)).await.unwrap();
        clock.advance(Duration::from_secs(4));

        assert_eq!(cache.get("type/13").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_capacity_prefers_expired_entries() {
        let (cache, clock) = cache_with_clock(2);

        cache.set("short", b"1", Duration::from_secs(1)).await.unwrap();
        cache.set("long", b"2", Duration::from_secs(60)).await.unwrap();
        clock.advance(Duration::from_secs(2));

        cache.set("fresh", b"3", Duration::from_secs(60)).await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.expired_cleanups, 1);
        assert_eq!(stats.evictions, 0);
        assert!(cache.get("long").await.unwrap().is_some());
        assert!(cache.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_capacity_evicts_soonest_expiring() {
        let (cache, _clock) = cache_with_clock(2);

        cache.set("a", b"1", Duration::from_secs(30)).await.unwrap();
        cache.set("b", b"2", Duration::from_secs(10)).await.unwrap();
        cache.set("c", b"3", Duration::from_secs(60)).await.unwrap();

        assert!(cache.get("b").await.unwrap().is_none());
        assert!(cache.get("a").await.unwrap().is_some());
        assert!(cache.get("c").await.unwrap().is_some());
        assert_eq!(cache.stats().await.unwrap().evictions, 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let cache = InMemoryCache::new(InMemoryCacheConfig::default());

        cache.set("key1", b"value1", Duration::from_secs(60)).await.unwrap();
        cache.get("key1").await.unwrap(); // Hit
        cache.get("key2").await.unwrap(); // Miss

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let cache = Arc::new(InMemoryCache::new(InMemoryCacheConfig::default()));

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let key = format!("pokemon/{}", i % 8);
                    cache.set(&key, format!("{}", i).as_bytes(), Duration::from_secs(60)).await.unwrap();
                    cache.get(&key).await.unwrap()
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }
        assert_eq!(cache.stats().await.unwrap().entries, 8);
    }
}
