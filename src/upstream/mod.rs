//! # Upstream Module
//!
//! Everything that talks to the upstream HTTP API.
//!
//! - [`HttpFetchClient`]: GET requests, response classification
//! - [`RetryPolicy`]: exponential back-off for transient failures

pub mod client;
pub mod retry;

pub use client::HttpFetchClient;
pub use retry::{Jitter, RetryPolicy, RetryState};
