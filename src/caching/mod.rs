//! # Caching System Module
//!
//! This module provides the cache side of the fetch pipeline: two interchangeable
//! stores behind one contract, the key derivation for upstream requests, and
//! single-flight coordination of concurrent fetches.
//!
//! ## Architecture
//! 1. **Cache Stores**: in-memory (`InMemoryCache`) and Redis (`RedisCache`)
//!    implementations of [`CacheStore`]
//! 2. **Cache Backend**: [`CacheBackend`], the variant chosen once at startup,
//!    which absorbs store faults so the cache is never a correctness dependency
//! 3. **Key Generation**: [`FetchRequest`] and [`CacheKey`], normalizing paths and
//!    query parameters so identical requests share a cache entry
//! 4. **Deduplication**: [`SingleFlight`], at most one upstream fetch per key
//!
//! ## Usage Example
//! ```rust,no_run
//! use std::time::Duration;
//! use pokefetch::caching::{CacheBackend, FetchRequest, InMemoryCacheConfig};
//!
//! # async fn example() {
//! let backend = CacheBackend::local(InMemoryCacheConfig::default());
//! let key = FetchRequest::new("pokemon/25").cache_key().unwrap();
//!
//! backend.set(&key, br#"{"id":25}"#, Duration::from_secs(300)).await;
//! if let Some(bytes) = backend.get(&key).await {
//!     // Use cached bytes
//! }
//! # }
//! ```

pub mod backend;
pub mod deduplication;
pub mod key_generator;
pub mod stores;

pub use backend::CacheBackend;
pub use deduplication::{FlightAborted, FlightOutcome, SingleFlight};
pub use key_generator::{CacheKey, FetchRequest};
pub use stores::{
    CacheEntry, CacheStore, CacheStoreStats, InMemoryCache, InMemoryCacheConfig, RedisCache,
    RedisCacheConfig,
};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
///
/// These never cross the pipeline boundary. [`CacheBackend`] logs them and
/// degrades to a miss (reads) or a dropped write (writes).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache operation timeout")]
    Timeout,

    #[error("Cache not available")]
    Unavailable,
}
