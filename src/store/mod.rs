//! Store abstractions — pluggable persistence behind two narrow traits.
//!
//! The protocol engine never talks to a backend directly. It sees a
//! [`ResponseStore`] (cache key → full serialized response) and a
//! [`ValidatorStore`] (cache key → validator, with secondary lookups by
//! resource URI and route pattern for bulk invalidation). The in-memory
//! adapters in [`memory`] are the reference implementations; external
//! backends (key-value, relational, document, distributed) implement the
//! same traits out of tree and are selected at startup.
//!
//! Store failures are soft: a failed read is a cache miss, a failed write is
//! logged and the exchange continues. The engine never lets a backend
//! outage block the underlying request.

pub mod memory;

pub use memory::{MemoryResponseStore, MemoryValidatorStore};

use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::{Response, StatusCode};
use crate::key::CacheKey;
use crate::validator::TimedEntityTag;

/// Errors surfaced by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("stored entry could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A full response in its serialized, storable form.
///
/// Holds plain data only — status, headers, body, and the instant it was
/// stored. Converting from a [`Response`] copies what is needed and drops
/// everything tied to the in-flight exchange (the attached view model, the
/// connection flag), so a stored entry never keeps request state alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Response status code.
    pub status: u16,
    /// Response headers in transport order.
    pub headers: Vec<(String, String)>,
    /// Response body bytes, fully buffered.
    pub body: Vec<u8>,
    /// When this entry was written.
    pub stored_at: SystemTime,
}

impl CachedResponse {
    /// Captures a response for storage at the given instant.
    pub fn capture(response: &Response, stored_at: SystemTime) -> Self {
        Self {
            status: response.status().as_u16(),
            headers: response
                .headers()
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
            body: response.body_ref().to_vec(),
            stored_at,
        }
    }

    /// Returns the first value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces every occurrence of a header by a single new entry.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_owned(), value.into()));
    }

    /// Removes every occurrence of a header.
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Builds a [`Headers`](crate::http::Headers) view of the stored header
    /// list.
    pub fn headers_map(&self) -> crate::http::Headers {
        self.headers.iter().cloned().collect()
    }

    /// Rebuilds a [`Response`] to hand back to a caller.
    pub fn to_response(&self) -> Response {
        // Entries are only ever captured from a Response, so the status is
        // always a code this crate models.
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::InternalServerError);
        let mut response = Response::new(status).body_bytes(self.body.clone());
        for (name, value) in &self.headers {
            response.add_header(name.clone(), value.clone());
        }
        response
    }
}

/// Response store capability: cache key → serialized response.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Looks up the entry for a key. `Ok(None)` is a miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>, StoreError>;

    /// Writes (or overwrites) the entry for a key. Concurrent writers for
    /// the same key race and the last write wins.
    async fn put(&self, key: &CacheKey, response: CachedResponse) -> Result<(), StoreError>;

    /// Removes the entry for a key, reporting whether one existed.
    async fn remove(&self, key: &CacheKey) -> Result<bool, StoreError>;

    /// Removes everything.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Removes every entry whose key shares the given resource URI,
    /// returning how many were removed. Backends without a URI index may
    /// implement this best-effort.
    async fn remove_resource(&self, resource_uri: &str) -> Result<usize, StoreError>;
}

/// Validator store capability: cache key → validator, plus bulk removal by
/// resource URI and by route pattern.
#[async_trait]
pub trait ValidatorStore: Send + Sync {
    /// Looks up the validator for a key. `Ok(None)` is a miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<TimedEntityTag>, StoreError>;

    /// Writes (or overwrites) the validator for a key, indexing it by the
    /// key's resource URI and route pattern.
    async fn put(&self, key: &CacheKey, validator: TimedEntityTag) -> Result<(), StoreError>;

    /// Removes the validator for a key, reporting whether one existed.
    async fn remove(&self, key: &CacheKey) -> Result<bool, StoreError>;

    /// Removes everything.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Removes every validator under the given route pattern, returning how
    /// many were removed. After this returns, `get` for any affected key is
    /// a miss.
    async fn remove_route_pattern(&self, route_pattern: &str) -> Result<usize, StoreError>;

    /// Removes every validator for the given resource URI, returning how
    /// many were removed.
    async fn remove_resource(&self, resource_uri: &str) -> Result<usize, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_copies_data_and_drops_exchange_state() {
        struct Model;
        let response = Response::new(StatusCode::Ok)
            .header("ETag", "\"v1\"")
            .body("hello")
            .with_model(Model);

        let cached = CachedResponse::capture(&response, SystemTime::UNIX_EPOCH);
        assert_eq!(cached.status, 200);
        assert_eq!(cached.header("etag"), Some("\"v1\""));
        assert_eq!(cached.body, b"hello");

        let mut rebuilt = cached.to_response();
        assert_eq!(rebuilt.status(), StatusCode::Ok);
        assert_eq!(rebuilt.body_ref(), b"hello");
        assert!(rebuilt.take_model().is_none());
    }

    #[test]
    fn set_header_collapses_duplicates() {
        let response = Response::new(StatusCode::Ok)
            .header("Date", "a")
            .header("date", "b");
        let mut cached = CachedResponse::capture(&response, SystemTime::UNIX_EPOCH);
        cached.set_header("Date", "c");
        assert_eq!(cached.header("date"), Some("c"));
        assert_eq!(
            cached
                .headers
                .iter()
                .filter(|(k, _)| k.eq_ignore_ascii_case("date"))
                .count(),
            1
        );
    }

    #[test]
    fn cached_response_survives_json() {
        let response = Response::new(StatusCode::Created).body("x");
        let cached = CachedResponse::capture(&response, SystemTime::UNIX_EPOCH);
        let json = serde_json::to_string(&cached).unwrap();
        let back: CachedResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cached);
    }
}
