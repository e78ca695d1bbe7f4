//! # pokefetch - Cached PokeAPI Fetch Pipeline
//!
//! The data-access layer behind a Pokémon tool/resource server. Every handler
//! asks this crate for a JSON document by resource path; the crate answers
//! from a cache when it can and from the upstream API when it must.
//!
//! ## Guarantees
//! - Concurrent requests for the same uncached resource cause one upstream call
//! - Transient upstream failures are retried with exponential back-off
//! - A missing or broken cache never turns into a caller-visible error
//! - Failures are never cached
//!
//! ## Example
//!
//! ```rust,no_run
//! use pokefetch::{FetchConfig, FetchPipeline};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = FetchPipeline::new(&FetchConfig::from_env()?)?;
//!
//! let pikachu = pipeline.get("pokemon/pikachu", &[]).await?;
//! let page = pipeline.get("pokemon", &[("limit", "20"), ("offset", "40")]).await?;
//! println!("{} / {}", pikachu["id"], page["count"]);
//! # Ok(())
//! # }
//! ```

/// Configuration, error taxonomy and the injectable clock
pub mod core;

/// Cache stores, the backend selector, cache keys and single-flight coordination
pub mod caching;

/// HTTP client for the upstream API and its retry policy
pub mod upstream;

/// The fetch pipeline handlers call into
pub mod gateway;

/// Logging setup
pub mod observability;

pub use caching::{CacheBackend, CacheKey, FetchRequest};
pub use core::config::FetchConfig;
pub use core::error::{ConfigError, FetchError, FetchResult};
pub use gateway::{FetchPipeline, PipelineStats};
pub use upstream::{HttpFetchClient, RetryPolicy};
