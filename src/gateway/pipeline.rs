//! # Fetch Pipeline
//!
//! The single entry point used by tool and resource handlers: resolve a request
//! to a JSON document through the cache, coalescing concurrent misses.
//!
//! ## Request Flow
//! 1. Normalize the request into a [`CacheKey`]
//! 2. Cache lookup; a hit returns immediately
//! 3. On a miss, join the in-flight fetch for the key or start one
//! 4. The fetch re-checks the cache, calls upstream, and writes the document back
//! 5. Every caller attached to the flight receives its own copy of the outcome
//!
//! Failures are never cached, so the next request after an error goes upstream again.

use crate::caching::{CacheBackend, CacheKey, FetchRequest, SingleFlight};
use crate::caching::stores::CacheStoreStats;
use crate::core::config::FetchConfig;
use crate::core::error::{ConfigError, FetchError, FetchResult};
use crate::upstream::HttpFetchClient;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pipeline counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    /// Requests answered from the cache
    pub cache_hits: u64,

    /// Requests that missed the cache
    pub cache_misses: u64,

    /// Fetches actually started against upstream
    pub upstream_fetches: u64,

    /// Misses that attached to a fetch already in flight
    pub coalesced: u64,

    /// Requests that ended in an error
    pub errors: u64,

    /// Cache hit ratio over all requests
    pub hit_ratio: f64,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    upstream_fetches: AtomicU64,
    coalesced: AtomicU64,
    errors: AtomicU64,
}

struct PipelineInner {
    cache: CacheBackend,
    client: HttpFetchClient,
    ttl: Duration,
    flights: SingleFlight<FetchResult<Value>>,
    counters: Counters,
}

/// Cache-aside fetch pipeline with single-flight coalescing
///
/// Cheap to clone; clones share the cache, the client and the in-flight map.
#[derive(Clone)]
pub struct FetchPipeline {
    inner: Arc<PipelineInner>,
}

impl FetchPipeline {
    /// Build the pipeline from configuration
    pub fn new(config: &FetchConfig) -> Result<Self, ConfigError> {
        let cache = CacheBackend::from_config(config)
            .map_err(|e| ConfigError::invalid("cache_address", e.to_string()))?;
        let client = HttpFetchClient::new(config)?;

        info!(
            "Fetch pipeline ready: upstream {}, {} cache, ttl {:?}",
            client.base_url(),
            cache.kind(),
            config.cache_ttl
        );

        Ok(Self::from_parts(cache, client, config.cache_ttl))
    }

    /// Assemble a pipeline from already-built components
    pub fn from_parts(cache: CacheBackend, client: HttpFetchClient, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                cache,
                client,
                ttl,
                flights: SingleFlight::new(),
                counters: Counters::default(),
            }),
        }
    }

    /// Fetch the document at `path` with the given query parameters
    pub async fn get(&self, path: &str, query_params: &[(&str, &str)]) -> FetchResult<Value> {
        let request = FetchRequest::with_query(path, query_params.iter().copied());
        self.get_request(&request).await
    }

    /// Fetch the document at an absolute upstream URL
    pub async fn get_url(&self, url: &str) -> FetchResult<Value> {
        let request = FetchRequest::from_url(self.inner.client.base_url().as_str(), url)?;
        self.get_request(&request).await
    }

    /// Fetch the document for a request
    pub async fn get_request(&self, request: &FetchRequest) -> FetchResult<Value> {
        let result = self.resolve(request).await;

        if let Err(e) = &result {
            self.inner.counters.errors.fetch_add(1, Ordering::Relaxed);
            debug!(error_type = e.error_type(), "fetch failed: {}", e);
        }

        result
    }

    async fn resolve(&self, request: &FetchRequest) -> FetchResult<Value> {
        let key = request.cache_key()?;
        let counters = &self.inner.counters;

        if let Some(document) = self.inner.cached(&key).await {
            counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit for {}", key);
            return Ok(document);
        }

        counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        debug!("Cache miss for {}", key);

        let inner = Arc::clone(&self.inner);
        let flight_key = key.clone();
        let flight_request = request.clone();

        let outcome = self
            .inner
            .flights
            .run(key.as_str(), move || async move {
                inner.load(&flight_key, &flight_request).await
            })
            .await;

        if outcome.joined {
            counters.coalesced.fetch_add(1, Ordering::Relaxed);
        }

        outcome
            .result
            .unwrap_or_else(|aborted| Err(FetchError::upstream(None, aborted.to_string())))
    }

    /// Drop the cached document for a request
    pub async fn invalidate(&self, request: &FetchRequest) -> FetchResult<bool> {
        let key = request.cache_key()?;
        Ok(self.inner.cache.delete(&key).await)
    }

    /// Drop every cached document
    pub async fn clear(&self) {
        if let Err(e) = self.inner.cache.clear().await {
            warn!(cache = self.inner.cache.kind(), error = %e, "cache clear failed");
        }
    }

    /// Snapshot of the pipeline counters
    pub fn stats(&self) -> PipelineStats {
        let counters = &self.inner.counters;
        let cache_hits = counters.cache_hits.load(Ordering::Relaxed);
        let cache_misses = counters.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;

        PipelineStats {
            cache_hits,
            cache_misses,
            upstream_fetches: counters.upstream_fetches.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
            hit_ratio: if lookups > 0 {
                cache_hits as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }

    /// Statistics of the underlying cache store
    pub async fn cache_stats(&self) -> CacheStoreStats {
        self.inner.cache.stats().await
    }

    /// Whether the cache store currently answers
    pub async fn cache_healthy(&self) -> bool {
        self.inner.cache.health_check().await
    }

    /// Short name of the cache backend in use
    pub fn cache_kind(&self) -> &'static str {
        self.inner.cache.kind()
    }

    /// TTL applied to cache writes
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }
}

impl PipelineInner {
    /// Cached document for a key; unreadable entries count as misses
    async fn cached(&self, key: &CacheKey) -> Option<Value> {
        let bytes = self.cache.get(key).await?;

        match serde_json::from_slice(&bytes) {
            Ok(document) => Some(document),
            Err(e) => {
                warn!(key = %key, error = %e, "discarding unreadable cache entry");
                None
            }
        }
    }

    /// Body of a flight: fetch upstream and populate the cache
    async fn load(&self, key: &CacheKey, request: &FetchRequest) -> FetchResult<Value> {
        // A flight that finished between our miss and this point already wrote the entry
        if let Some(document) = self.cached(key).await {
            return Ok(document);
        }

        self.counters.upstream_fetches.fetch_add(1, Ordering::Relaxed);
        let document = self.client.fetch(request).await?;

        match serde_json::to_vec(&document) {
            Ok(bytes) => {
                self.cache.set(key, &bytes, self.ttl).await;
            }
            Err(e) => warn!(key = %key, error = %e, "failed to serialize document for cache"),
        }

        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::InMemoryCacheConfig;
    use crate::core::clock::ManualClock;
    use crate::upstream::RetryPolicy;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pipeline(server: &MockServer, cache: CacheBackend) -> FetchPipeline {
        let client = HttpFetchClient::with_policy(
            &server.uri(),
            Duration::from_millis(500),
            RetryPolicy::immediate(2),
        )
        .unwrap();
        FetchPipeline::from_parts(cache, client, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_second_read_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pokemon/25"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 25})))
            .expect(1)
            .mount(&server)
            .await;

        let pipeline = pipeline(&server, CacheBackend::local(InMemoryCacheConfig::default()));

        let first = pipeline.get("pokemon/25", &[]).await.unwrap();
        let second = pipeline.get(" Pokemon/25/ ", &[]).await.unwrap();

        assert_eq!(first, second);
        let stats = pipeline.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.upstream_fetches, 1);
        assert_eq!(stats.hit_ratio, 0.5);
    }

    #[tokio::test]
    async fn test_unreadable_cache_entry_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item/4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "poke-ball"})))
            .expect(1)
            .mount(&server)
            .await;

        let pipeline = pipeline(&server, CacheBackend::local(InMemoryCacheConfig::default()));
        let key = FetchRequest::new("item/4").cache_key().unwrap();
        pipeline
            .inner
            .cache
            .set(&key, b"not json", Duration::from_secs(60))
            .await;

        let document = pipeline.get("item/4", &[]).await.unwrap();
        assert_eq!(document["name"], "poke-ball");
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/type/13"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "electric"})))
            .expect(2)
            .mount(&server)
            .await;

        let pipeline = pipeline(&server, CacheBackend::local(InMemoryCacheConfig::default()));
        let request = FetchRequest::new("type/13");

        pipeline.get_request(&request).await.unwrap();
        assert!(pipeline.invalidate(&request).await.unwrap());
        assert!(!pipeline.invalidate(&request).await.unwrap());
        pipeline.get_request(&request).await.unwrap();

        assert_eq!(pipeline.stats().upstream_fetches, 2);
    }

    #[tokio::test]
    async fn test_ttl_expiry_goes_back_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/berry/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "cheri"})))
            .expect(2)
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock::new());
        let cache = CacheBackend::local_with_clock(InMemoryCacheConfig::default(), clock.clone());
        let pipeline = pipeline(&server, cache);

        pipeline.get("berry/1", &[]).await.unwrap();
        clock.advance(Duration::from_secs(30));
        pipeline.get("berry/1", &[]).await.unwrap();
        clock.advance(Duration::from_secs(31));
        pipeline.get("berry/1", &[]).await.unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.upstream_fetches, 2);
    }

    #[tokio::test]
    async fn test_invalid_path_never_reaches_upstream() {
        let server = MockServer::start().await;
        let pipeline = pipeline(&server, CacheBackend::local(InMemoryCacheConfig::default()));

        let error = pipeline.get("pokemon?limit=1", &[]).await.unwrap_err();

        assert_eq!(error.error_type(), "invalid_key");
        assert_eq!(pipeline.stats().errors, 1);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_url_follows_resource_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ability/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "static"})))
            .expect(1)
            .mount(&server)
            .await;

        let pipeline = pipeline(&server, CacheBackend::local(InMemoryCacheConfig::default()));
        let url = format!("{}/ability/9/", server.uri());

        let document = pipeline.get_url(&url).await.unwrap();
        assert_eq!(document["name"], "static");

        // Same resource by path hits the entry written through the URL form
        pipeline.get("ability/9", &[]).await.unwrap();
        assert_eq!(pipeline.stats().cache_hits, 1);
    }
}
