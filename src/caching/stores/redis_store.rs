//! # Redis Cache Store
//!
//! Shared cache used when a Redis address is configured. Several pipeline
//! processes can point at the same Redis and reuse each other's entries, and
//! entries survive process restarts.
//!
//! The connection is opened lazily on first use. Every operation is bounded by
//! `operation_timeout`, and after a failed connect the store reports
//! [`CacheError::Unavailable`] for `reconnect_cooldown` instead of paying the
//! connect cost on every request. TTLs are enforced by Redis itself (`SET PX`).

use super::{CacheStore, CacheStoreStats};
use crate::caching::{CacheError, CacheResult};
use crate::observability::redact_credentials;
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Redis cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisCacheConfig {
    /// Redis connection URL
    pub url: String,

    /// Key prefix for all cache entries
    pub key_prefix: String,

    /// Upper bound for connect and for each command round-trip
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// How long to stop trying after a failed connect
    #[serde(with = "humantime_serde")]
    pub reconnect_cooldown: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "pokefetch:cache:".to_string(),
            operation_timeout: Duration::from_secs(1),
            reconnect_cooldown: Duration::from_secs(5),
        }
    }
}

/// Redis cache implementation
pub struct RedisCache {
    /// Configuration
    config: RedisCacheConfig,

    /// Redis client used to (re)open connections
    client: Client,

    /// Established connection, if any
    connection: Mutex<Option<ConnectionManager>>,

    /// Connect attempts are skipped until this instant
    unavailable_until: SyncMutex<Option<Instant>>,

    /// Statistics counters
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl RedisCache {
    /// Create a new Redis cache
    ///
    /// Only the URL is validated here; no network I/O happens until first use.
    pub fn new(config: RedisCacheConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            config,
            client,
            connection: Mutex::new(None),
            unavailable_until: SyncMutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }

    /// Get the full cache key with prefix
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Whether a recent failed connect still blocks new attempts
    fn in_cooldown(&self) -> bool {
        let cooldown = *self.unavailable_until.lock();
        cooldown.map_or(false, |until| Instant::now() < until)
    }

    /// Return the live connection, opening one if needed
    async fn connection(&self) -> CacheResult<ConnectionManager> {
        if self.in_cooldown() {
            return Err(CacheError::Unavailable);
        }

        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        // Callers queued behind a failed connect must not each retry it
        if self.in_cooldown() {
            return Err(CacheError::Unavailable);
        }

        let connected = match timeout(
            self.config.operation_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(CacheError::Redis(e)),
            Err(_) => Err(CacheError::Timeout),
        };

        match connected {
            Ok(conn) => {
                *self.unavailable_until.lock() = None;
                *guard = Some(conn.clone());
                info!("Redis cache connected to {}", redact_credentials(&self.config.url));
                Ok(conn)
            }
            Err(e) => {
                *self.unavailable_until.lock() = Some(Instant::now() + self.config.reconnect_cooldown);
                warn!(
                    "Failed to connect to Redis at {}: {} (retrying in {:?})",
                    redact_credentials(&self.config.url),
                    e,
                    self.config.reconnect_cooldown
                );
                Err(e)
            }
        }
    }

    /// Execute a Redis operation under the operation timeout
    async fn execute<T, F, Fut>(&self, operation: F) -> CacheResult<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = match self.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        match timeout(self.config.operation_timeout, operation(conn)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                if e.is_io_error() || e.is_connection_dropped() {
                    // Force a fresh connection on the next operation
                    self.connection.lock().await.take();
                }
                Err(CacheError::Redis(e))
            }
            Err(_) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Timeout)
            }
        }
    }

    /// Collect every key under our prefix with SCAN
    async fn scan_keys(&self) -> CacheResult<Vec<String>> {
        let pattern = format!("{}*", self.config.key_prefix);

        self.execute(|mut conn| async move {
            let mut cursor: u64 = 0;
            let mut all_keys = Vec::new();

            loop {
                let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(1000)
                    .query_async(&mut conn)
                    .await?;

                all_keys.extend(keys);

                if new_cursor == 0 {
                    break;
                }
                cursor = new_cursor;
            }

            Ok(all_keys)
        })
        .await
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let full_key = self.full_key(key);

        let result = self
            .execute(|mut conn| async move { conn.get::<_, Option<Vec<u8>>>(&full_key).await })
            .await;

        match result {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Redis cache hit for key: {}", key);
                Ok(Some(value))
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Redis cache miss for key: {}", key);
                Ok(None)
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let full_key = self.full_key(key);
        // PX takes whole milliseconds and rejects zero
        let ttl_ms = (ttl.as_millis() as u64).max(1);

        self.execute(|mut conn| async move {
            redis::cmd("SET")
                .arg(&full_key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await?;

        debug!("Set Redis cache key: {} with TTL: {:?}", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let full_key = self.full_key(key);

        let deleted_count: i64 = self
            .execute(|mut conn| async move { conn.del(&full_key).await })
            .await?;

        Ok(deleted_count > 0)
    }

    async fn clear(&self) -> CacheResult<()> {
        let keys = self.scan_keys().await?;

        if !keys.is_empty() {
            let deleted_count: i64 = self
                .execute(|mut conn| async move { conn.del(&keys).await })
                .await?;

            info!("Cleared {} keys from Redis cache", deleted_count);
        }

        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStoreStats> {
        // Entry count is best-effort; the counters are always available
        let entries = self.scan_keys().await.map(|keys| keys.len()).unwrap_or(0);

        Ok(CacheStoreStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: 0,        // Redis handles eviction internally
            expired_cleanups: 0, // Redis handles TTL cleanup internally
            errors: self.errors.load(Ordering::Relaxed),
        })
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let result = self
            .execute(|mut conn| async move {
                redis::cmd("PING").query_async::<_, String>(&mut conn).await
            })
            .await;

        match result {
            Ok(response) => Ok(response == "PONG"),
            Err(_) => Ok(false),
        }
    }
}
