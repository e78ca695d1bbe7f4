//! # Observability Module
//!
//! Structured logging for the fetch pipeline. Cache hits, misses, retries and
//! degraded-cache events are emitted as `tracing` events; [`init_logging`]
//! decides where they go.

pub mod logging;

pub use logging::{init_logging, redact_credentials};
