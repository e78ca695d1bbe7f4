//! # Error Handling Module
//!
//! This module defines the errors that cross the public boundary of the crate,
//! built with the `thiserror` crate.
//!
//! ## Error Taxonomy
//!
//! Callers of the fetch pipeline receive exactly one of:
//! - a parsed JSON document, or
//! - a [`FetchError`] describing why the document could not be produced.
//!
//! Cache faults never show up here. They are absorbed inside
//! [`crate::caching::CacheBackend`] and only logged (see [`crate::caching::CacheError`]).
//!
//! ### Retry Classification
//! `FetchError::is_retryable` tells the HTTP client whether an attempt failure is
//! transient (worth another attempt) or definitive:
//! - `Upstream` is transient for 5xx and for failures without a status
//!   (timeouts, connection resets); any other unexpected status (1xx, an
//!   unfollowed 3xx) is definitive
//! - `NotFound` (any 4xx) is definitive, the entity does not exist or the request is malformed
//! - `Decode` is definitive, a retry would return the same malformed body
//! - `InvalidKey` never reaches the network at all

use thiserror::Error;

/// Result type returned by the fetch pipeline and the HTTP client
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors surfaced to tool/resource handlers
///
/// The type is `Clone` because a single upstream failure is delivered to every
/// caller that joined the same in-flight fetch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Upstream answered with a 4xx status for the requested resource
    #[error("Resource not found: {path} (status {status})")]
    NotFound { status: u16, path: String },

    /// Upstream kept failing (5xx or connection-level) until retries ran out
    #[error("Upstream failure{}: {message}", status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    Upstream { status: Option<u16>, message: String },

    /// Upstream body was not valid JSON
    #[error("Failed to decode upstream response: {message}")]
    Decode { message: String },

    /// The request could not be turned into a cache key
    #[error("Invalid resource path: {message}")]
    InvalidKey { message: String },
}

impl FetchError {
    /// Create a not-found error for a path
    pub fn not_found<S: Into<String>>(status: u16, path: S) -> Self {
        Self::NotFound {
            status,
            path: path.into(),
        }
    }

    /// Create an upstream error with an optional HTTP status
    pub fn upstream<S: Into<String>>(status: Option<u16>, message: S) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Create a decode error with a custom message
    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an invalid key error with a custom message
    pub fn invalid_key<S: Into<String>>(message: S) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Check if another attempt could produce a different outcome
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { status, .. } => status.map_or(true, |status| status >= 500),
            Self::NotFound { .. } | Self::Decode { .. } | Self::InvalidKey { .. } => false,
        }
    }

    /// HTTP status reported by upstream, when there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { status, .. } => Some(*status),
            Self::Upstream { status, .. } => *status,
            Self::Decode { .. } | Self::InvalidKey { .. } => None,
        }
    }

    /// Get a string representation of the error kind for logs and handlers
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Upstream { .. } => "upstream_error",
            Self::Decode { .. } => "decode_error",
            Self::InvalidKey { .. } => "invalid_key",
        }
    }
}

/// Implement conversion from serde_json::Error
impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err.to_string())
    }
}

/// Errors raised while loading or validating [`crate::core::config::FetchConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value that cannot be used
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// The configuration file could not be read
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML
    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    /// Create an invalid-field error
    pub fn invalid<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
