//! # Cache Stores Module
//!
//! This module provides the two cache store implementations, in-memory and
//! Redis-based, and the contract they share.

pub mod memory;
pub mod redis_store;

pub use memory::{InMemoryCache, InMemoryCacheConfig};
pub use redis_store::{RedisCache, RedisCacheConfig};

use super::CacheResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Cache entry with expiry metadata
///
/// Owned by the in-memory store; readers only ever get a copy of `value`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Raw JSON document bytes
    pub value: Vec<u8>,

    /// When the entry was written
    pub created_at: Instant,

    /// When the entry stops being served
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Create a new cache entry written at `now`
    pub fn new(value: Vec<u8>, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Check if the entry is expired at the given instant
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    /// Time left before expiry, zero once expired
    pub fn ttl_at(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Trait for cache store implementations
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value from the cache; expired entries read as absent
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set a value in the cache with TTL
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Delete a value from the cache
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Clear all entries from the cache
    async fn clear(&self) -> CacheResult<()>;

    /// Get cache statistics
    async fn stats(&self) -> CacheResult<CacheStoreStats>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<bool>;
}

/// Cache store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStoreStats {
    /// Number of entries
    pub entries: usize,

    /// Number of hits
    pub hits: u64,

    /// Number of misses (including expired reads)
    pub misses: u64,

    /// Number of capacity evictions
    pub evictions: u64,

    /// Number of expired entries removed
    pub expired_cleanups: u64,

    /// Number of failed store operations
    pub errors: u64,
}
