//! # Cache Backend
//!
//! The cache variant the pipeline talks to, chosen once at startup:
//! - **Shared** ([`RedisCache`]) when a cache address is configured
//! - **Local** ([`InMemoryCache`]) otherwise
//!
//! The backend is where cache faults stop. A failed read is logged and reported
//! as a miss; a failed write is logged and dropped. Nothing store-related ever
//! reaches the pipeline's callers, so the cache stays an optimization only.

use super::stores::{
    CacheStore, CacheStoreStats, InMemoryCache, InMemoryCacheConfig, RedisCache, RedisCacheConfig,
};
use super::{CacheKey, CacheResult};
use crate::core::clock::SharedClock;
use crate::core::config::FetchConfig;
use crate::observability::redact_credentials;
use std::time::Duration;
use tracing::{info, warn};

/// Cache backend selected from configuration
pub enum CacheBackend {
    /// Network store shared between processes
    Shared(RedisCache),

    /// Process-local store
    Local(InMemoryCache),
}

impl CacheBackend {
    /// Select the backend from configuration
    ///
    /// Fails only when the configured shared-store address cannot be used at all.
    pub fn from_config(config: &FetchConfig) -> CacheResult<Self> {
        match &config.cache_address {
            Some(url) => {
                let redis = RedisCache::new(RedisCacheConfig {
                    url: url.clone(),
                    key_prefix: config.cache_key_prefix.clone(),
                    operation_timeout: config.cache_operation_timeout,
                    ..Default::default()
                })?;
                info!("Using shared Redis cache at {}", redact_credentials(url));
                Ok(Self::Shared(redis))
            }
            None => {
                info!(
                    "No shared cache configured, using in-memory cache (max {} entries)",
                    config.max_local_entries
                );
                Ok(Self::local(InMemoryCacheConfig {
                    max_entries: config.max_local_entries,
                }))
            }
        }
    }

    /// In-memory backend on the system clock
    pub fn local(config: InMemoryCacheConfig) -> Self {
        Self::Local(InMemoryCache::new(config))
    }

    /// In-memory backend on a custom clock
    pub fn local_with_clock(config: InMemoryCacheConfig, clock: SharedClock) -> Self {
        Self::Local(InMemoryCache::with_clock(config, clock))
    }

    /// Shared Redis backend
    pub fn shared(config: RedisCacheConfig) -> CacheResult<Self> {
        Ok(Self::Shared(RedisCache::new(config)?))
    }

    /// Short name of the variant, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Shared(_) => "redis",
            Self::Local(_) => "memory",
        }
    }

    /// Read a cached document; any store failure reads as a miss
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let result = match self {
            Self::Shared(store) => store.get(key.as_str()).await,
            Self::Local(store) => store.get(key.as_str()).await,
        };

        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(cache = self.kind(), key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write a document; returns whether the write landed
    pub async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> bool {
        let result = match self {
            Self::Shared(store) => store.set(key.as_str(), value, ttl).await,
            Self::Local(store) => store.set(key.as_str(), value, ttl).await,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(cache = self.kind(), key = %key, error = %e, "cache write failed, dropping entry");
                false
            }
        }
    }

    /// Remove a document; returns whether something was removed
    pub async fn delete(&self, key: &CacheKey) -> bool {
        let result = match self {
            Self::Shared(store) => store.delete(key.as_str()).await,
            Self::Local(store) => store.delete(key.as_str()).await,
        };

        result.unwrap_or_else(|e| {
            warn!(cache = self.kind(), key = %key, error = %e, "cache delete failed");
            false
        })
    }

    /// Remove every entry
    pub async fn clear(&self) -> CacheResult<()> {
        match self {
            Self::Shared(store) => store.clear().await,
            Self::Local(store) => store.clear().await,
        }
    }

    /// Store statistics; an unreachable store reports zeroed counts
    pub async fn stats(&self) -> CacheStoreStats {
        let result = match self {
            Self::Shared(store) => store.stats().await,
            Self::Local(store) => store.stats().await,
        };

        result.unwrap_or_default()
    }

    /// Whether the store currently answers
    pub async fn health_check(&self) -> bool {
        let result = match self {
            Self::Shared(store) => store.health_check().await,
            Self::Local(store) => store.health_check().await,
        };

        result.unwrap_or(false)
    }
}
