//! # Cache Key Generator
//!
//! This module turns upstream requests into cache keys.
//!
//! ## Normalization Rules
//! - the path is trimmed and lower-cased
//! - leading/trailing `/` are stripped and repeated `/` collapsed
//! - query parameter names are trimmed and lower-cased; values are trimmed
//!   but keep their case, since they are sent upstream as given
//! - query parameters are ordered by name and form-urlencoded
//!
//! So `" Pokemon//25/ "` and `"pokemon/25"` map to the same key, and
//! `{offset: 20, limit: 10}` and `{limit: 10, offset: 20}` do too.

use crate::core::error::{FetchError, FetchResult};
use std::collections::BTreeMap;
use std::fmt;
use url::{form_urlencoded, Url};

/// Normalized identifier of a fetchable resource, e.g. `pokemon/25`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Get the key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An upstream GET request: a resource path plus query parameters
///
/// Immutable once built; the `with_param` builder consumes and returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    path: String,
    query_params: BTreeMap<String, String>,
}

impl FetchRequest {
    /// Create a request for a path without query parameters
    pub fn new<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            query_params: BTreeMap::new(),
        }
    }

    /// Create a request for a path with query parameters
    pub fn with_query<S, I, K, V>(path: S, params: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            path: path.into(),
            query_params: params.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Add one query parameter
    pub fn with_param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    /// Build a request from an absolute upstream URL
    ///
    /// PokeAPI documents link to related resources by absolute URL
    /// (`https://pokeapi.co/api/v2/type/13/`). The URL must live under `base_url`.
    pub fn from_url(base_url: &str, url: &str) -> FetchResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| FetchError::invalid_key(format!("invalid base url {}: {}", base_url, e)))?;
        let target =
            Url::parse(url).map_err(|e| FetchError::invalid_key(format!("invalid url {}: {}", url, e)))?;

        if target.origin() != base.origin() {
            return Err(FetchError::invalid_key(format!(
                "{} is not served by {}",
                url, base_url
            )));
        }

        let base_path = base.path().trim_end_matches('/');
        let rest = target
            .path()
            .strip_prefix(base_path)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .ok_or_else(|| FetchError::invalid_key(format!("{} is not under {}", url, base_url)))?;

        Ok(Self::with_query(
            rest.to_string(),
            target.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())),
        ))
    }

    /// Raw path as given by the caller
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query parameters as given by the caller
    pub fn query_params(&self) -> &BTreeMap<String, String> {
        &self.query_params
    }

    /// Normalized path, the form used both for the cache key and the upstream URL
    pub fn normalized_path(&self) -> FetchResult<String> {
        let lowered = self.path.trim().to_lowercase();

        if let Some(bad) = lowered.chars().find(|c| c.is_whitespace() || *c == '?' || *c == '#') {
            return Err(FetchError::invalid_key(format!(
                "path {:?} contains {:?}; pass query parameters separately",
                self.path, bad
            )));
        }

        let segments: Vec<&str> = lowered.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(FetchError::invalid_key("resource path is empty"));
        }

        Ok(segments.join("/"))
    }

    /// Normalized query parameters, ordered by name
    pub fn normalized_query(&self) -> FetchResult<BTreeMap<String, String>> {
        let mut normalized = BTreeMap::new();

        for (key, value) in &self.query_params {
            let key = key.trim().to_lowercase();
            if key.is_empty() {
                return Err(FetchError::invalid_key("query parameter name is empty"));
            }
            normalized.insert(key, value.trim().to_string());
        }

        Ok(normalized)
    }

    /// Derive the cache key for this request
    pub fn cache_key(&self) -> FetchResult<CacheKey> {
        let path = self.normalized_path()?;
        let query = self.normalized_query()?;

        if query.is_empty() {
            return Ok(CacheKey(path));
        }

        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query.iter())
            .finish();
        Ok(CacheKey(format!("{}?{}", path, encoded)))
    }
}

impl From<&str> for FetchRequest {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for FetchRequest {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_key() {
        let key = FetchRequest::new("pokemon/25").cache_key().unwrap();
        assert_eq!(key.as_str(), "pokemon/25");
    }

    #[test]
    fn test_case_and_whitespace_normalized() {
        let expected = FetchRequest::new("pokemon/pikachu").cache_key().unwrap();

        for raw in ["  Pokemon/Pikachu ", "/pokemon/pikachu/", "pokemon//PIKACHU"] {
            assert_eq!(FetchRequest::new(raw).cache_key().unwrap(), expected, "raw path {:?}", raw);
        }
    }

    #[test]
    fn test_query_order_does_not_matter() {
        let a = FetchRequest::with_query("pokemon", [("offset", "20"), ("limit", "10")]);
        let b = FetchRequest::new("pokemon").with_param("Limit", " 10 ").with_param("offset", "20");

        let key = a.cache_key().unwrap();
        assert_eq!(key, b.cache_key().unwrap());
        assert_eq!(key.as_str(), "pokemon?limit=10&offset=20");
    }

    #[test]
    fn test_query_values_keep_their_case() {
        let upper = FetchRequest::new("pokemon").with_param("Name", " Mr-Mime ");
        let lower = FetchRequest::new("pokemon").with_param("name", "mr-mime");

        assert_eq!(upper.cache_key().unwrap().as_str(), "pokemon?name=Mr-Mime");
        assert_ne!(upper.cache_key().unwrap(), lower.cache_key().unwrap());
    }

    #[test]
    fn test_query_values_are_encoded() {
        let key = FetchRequest::new("move")
            .with_param("name", "thunder punch&x=1")
            .cache_key()
            .unwrap();
        assert_eq!(key.as_str(), "move?name=thunder+punch%26x%3D1");
    }

    #[test]
    fn test_invalid_paths_rejected() {
        for raw in ["", "   ", "///", "pokemon/mr mime", "pokemon?limit=1", "item#4"] {
            let err = FetchRequest::new(raw).cache_key().unwrap_err();
            assert_eq!(err.error_type(), "invalid_key", "raw path {:?}", raw);
        }

        let err = FetchRequest::new("pokemon").with_param(" ", "x").cache_key().unwrap_err();
        assert_eq!(err.error_type(), "invalid_key");
    }

    #[test]
    fn test_from_absolute_url() {
        let base = "https://pokeapi.co/api/v2";

        let request = FetchRequest::from_url(base, "https://pokeapi.co/api/v2/type/13/").unwrap();
        assert_eq!(request.cache_key().unwrap().as_str(), "type/13");

        let request =
            FetchRequest::from_url(base, "https://pokeapi.co/api/v2/pokemon?offset=20&limit=20").unwrap();
        assert_eq!(request.cache_key().unwrap().as_str(), "pokemon?limit=20&offset=20");
    }

    #[test]
    fn test_from_foreign_url_rejected() {
        let base = "https://pokeapi.co/api/v2";

        assert!(FetchRequest::from_url(base, "https://example.com/api/v2/type/13/").is_err());
        assert!(FetchRequest::from_url(base, "https://pokeapi.co/api/v1/type/13/").is_err());
        assert!(FetchRequest::from_url(base, "https://pokeapi.co/api/v2x/type").is_err());
        assert!(FetchRequest::from_url(base, "type/13").is_err());
    }
}
