//! # Gateway Module
//!
//! The public face of the crate: [`FetchPipeline`] ties the cache backend, the
//! single-flight coordinator and the upstream client together.

pub mod pipeline;

pub use pipeline::{FetchPipeline, PipelineStats};
