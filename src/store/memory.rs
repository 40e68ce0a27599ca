//! In-memory store adapters.
//!
//! Reference implementations of the store traits backed by a single
//! `RwLock` over the primary map and its secondary indices. Holding all of
//! them under one lock makes bulk removal atomic with respect to a single
//! caller: a lookup racing a bulk removal observes either the old entry or
//! a miss, never a half-removed record.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{CachedResponse, ResponseStore, StoreError, ValidatorStore};
use crate::key::CacheKey;
use crate::validator::TimedEntityTag;

fn lock_poisoned() -> StoreError {
    StoreError::Unavailable("in-memory store lock poisoned".to_owned())
}

// Drops `hash` from the index set under `index_key`, pruning empty sets.
fn unindex(index: &mut HashMap<String, HashSet<String>>, index_key: &str, hash: &str) {
    if let Some(set) = index.get_mut(index_key) {
        set.remove(hash);
        if set.is_empty() {
            index.remove(index_key);
        }
    }
}

/// Thread-safe in-memory response store with a resource-URI index.
#[derive(Debug, Default)]
pub struct MemoryResponseStore {
    inner: RwLock<ResponseEntries>,
}

#[derive(Debug, Default)]
struct ResponseEntries {
    by_hash: HashMap<String, CachedResponse>,
    by_uri: HashMap<String, HashSet<String>>,
}

impl MemoryResponseStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.read().map(|e| e.by_hash.len()).unwrap_or(0)
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResponseStore for MemoryResponseStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>, StoreError> {
        let entries = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(entries.by_hash.get(key.hash()).cloned())
    }

    async fn put(&self, key: &CacheKey, response: CachedResponse) -> Result<(), StoreError> {
        let mut entries = self.inner.write().map_err(|_| lock_poisoned())?;
        entries
            .by_hash
            .insert(key.hash().to_owned(), response);
        entries
            .by_uri
            .entry(key.resource_uri().to_owned())
            .or_default()
            .insert(key.hash().to_owned());
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let mut entries = self.inner.write().map_err(|_| lock_poisoned())?;
        let removed = entries.by_hash.remove(key.hash()).is_some();
        if removed {
            unindex(&mut entries.by_uri, key.resource_uri(), key.hash());
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.inner.write().map_err(|_| lock_poisoned())?;
        entries.by_hash.clear();
        entries.by_uri.clear();
        Ok(())
    }

    async fn remove_resource(&self, resource_uri: &str) -> Result<usize, StoreError> {
        let mut entries = self.inner.write().map_err(|_| lock_poisoned())?;
        let Some(hashes) = entries.by_uri.remove(resource_uri) else {
            return Ok(0);
        };
        let mut removed = 0;
        for hash in hashes {
            if entries.by_hash.remove(&hash).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Thread-safe in-memory validator store with resource-URI and
/// route-pattern indices.
#[derive(Debug, Default)]
pub struct MemoryValidatorStore {
    inner: RwLock<ValidatorEntries>,
}

#[derive(Debug, Default)]
struct ValidatorEntries {
    by_hash: HashMap<String, StoredValidator>,
    by_uri: HashMap<String, HashSet<String>>,
    by_pattern: HashMap<String, HashSet<String>>,
}

// The validator plus the index keys it was filed under, so removal by hash
// can also unfile it.
#[derive(Debug, Clone)]
struct StoredValidator {
    validator: TimedEntityTag,
    resource_uri: String,
    route_pattern: String,
}

impl MemoryValidatorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored validators.
    pub fn len(&self) -> usize {
        self.inner.read().map(|e| e.by_hash.len()).unwrap_or(0)
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ValidatorStore for MemoryValidatorStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<TimedEntityTag>, StoreError> {
        let entries = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(entries
            .by_hash
            .get(key.hash())
            .map(|stored| stored.validator.clone()))
    }

    async fn put(&self, key: &CacheKey, validator: TimedEntityTag) -> Result<(), StoreError> {
        let mut entries = self.inner.write().map_err(|_| lock_poisoned())?;
        entries.by_hash.insert(
            key.hash().to_owned(),
            StoredValidator {
                validator,
                resource_uri: key.resource_uri().to_owned(),
                route_pattern: key.route_pattern().to_owned(),
            },
        );
        entries
            .by_uri
            .entry(key.resource_uri().to_owned())
            .or_default()
            .insert(key.hash().to_owned());
        entries
            .by_pattern
            .entry(key.route_pattern().to_owned())
            .or_default()
            .insert(key.hash().to_owned());
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let mut entries = self.inner.write().map_err(|_| lock_poisoned())?;
        let Some(stored) = entries.by_hash.remove(key.hash()) else {
            return Ok(false);
        };
        unindex(&mut entries.by_uri, &stored.resource_uri, key.hash());
        unindex(&mut entries.by_pattern, &stored.route_pattern, key.hash());
        Ok(true)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.inner.write().map_err(|_| lock_poisoned())?;
        entries.by_hash.clear();
        entries.by_uri.clear();
        entries.by_pattern.clear();
        Ok(())
    }

    async fn remove_route_pattern(&self, route_pattern: &str) -> Result<usize, StoreError> {
        let mut entries = self.inner.write().map_err(|_| lock_poisoned())?;
        let Some(hashes) = entries.by_pattern.remove(route_pattern) else {
            return Ok(0);
        };
        let mut removed = 0;
        for hash in hashes {
            if let Some(stored) = entries.by_hash.remove(&hash) {
                unindex(&mut entries.by_uri, &stored.resource_uri, &hash);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn remove_resource(&self, resource_uri: &str) -> Result<usize, StoreError> {
        let mut entries = self.inner.write().map_err(|_| lock_poisoned())?;
        let Some(hashes) = entries.by_uri.remove(resource_uri) else {
            return Ok(0);
        };
        let mut removed = 0;
        for hash in hashes {
            if let Some(stored) = entries.by_hash.remove(&hash) {
                unindex(&mut entries.by_pattern, &stored.route_pattern, &hash);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Headers, Method, Response, StatusCode};
    use crate::validator::EntityTag;
    use std::time::SystemTime;

    fn key(uri: &str, pattern: &str, accept: &str) -> CacheKey {
        let mut headers = Headers::new();
        headers.insert("Accept", accept);
        CacheKey::compute(
            &Method::Get,
            uri,
            pattern,
            &headers,
            &["Accept".to_string()],
        )
    }

    fn cached(body: &str) -> CachedResponse {
        CachedResponse::capture(
            &Response::new(StatusCode::Ok).body(body),
            SystemTime::UNIX_EPOCH,
        )
    }

    fn validator(tag: &str) -> TimedEntityTag {
        TimedEntityTag::new(EntityTag::strong(tag), SystemTime::UNIX_EPOCH)
    }

    #[tokio::test]
    async fn response_store_get_put_remove() {
        let store = MemoryResponseStore::new();
        let k = key("http://h/cars/1", "/cars/:id", "application/json");

        assert!(store.get(&k).await.unwrap().is_none());
        store.put(&k, cached("a")).await.unwrap();
        assert_eq!(store.get(&k).await.unwrap().unwrap().body, b"a");

        // Last write wins.
        store.put(&k, cached("b")).await.unwrap();
        assert_eq!(store.get(&k).await.unwrap().unwrap().body, b"b");

        assert!(store.remove(&k).await.unwrap());
        assert!(!store.remove(&k).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn response_store_removes_all_variants_of_a_resource() {
        let store = MemoryResponseStore::new();
        let json = key("http://h/cars/1", "/cars/:id", "application/json");
        let xml = key("http://h/cars/1", "/cars/:id", "text/xml");
        let other = key("http://h/cars/2", "/cars/:id", "application/json");

        store.put(&json, cached("j")).await.unwrap();
        store.put(&xml, cached("x")).await.unwrap();
        store.put(&other, cached("o")).await.unwrap();

        assert_eq!(store.remove_resource("http://h/cars/1").await.unwrap(), 2);
        assert!(store.get(&json).await.unwrap().is_none());
        assert!(store.get(&xml).await.unwrap().is_none());
        assert!(store.get(&other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn validator_store_bulk_removal_by_pattern() {
        let store = MemoryValidatorStore::new();
        let car1 = key("http://h/cars/1", "/cars/:id", "a");
        let car2 = key("http://h/cars/2", "/cars/:id", "a");
        let owner = key("http://h/owners/1", "/owners/:id", "a");

        store.put(&car1, validator("c1")).await.unwrap();
        store.put(&car2, validator("c2")).await.unwrap();
        store.put(&owner, validator("o1")).await.unwrap();

        assert_eq!(store.remove_route_pattern("/cars/:id").await.unwrap(), 2);
        assert!(store.get(&car1).await.unwrap().is_none());
        assert!(store.get(&car2).await.unwrap().is_none());
        // Keys under other patterns are unaffected.
        assert_eq!(
            store.get(&owner).await.unwrap().unwrap().etag().opaque(),
            "o1"
        );
        assert_eq!(store.remove_route_pattern("/cars/:id").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn validator_store_bulk_removal_by_resource() {
        let store = MemoryValidatorStore::new();
        let json = key("http://h/cars/1", "/cars/:id", "application/json");
        let xml = key("http://h/cars/1", "/cars/:id", "text/xml");

        store.put(&json, validator("v")).await.unwrap();
        store.put(&xml, validator("v")).await.unwrap();

        assert_eq!(store.remove_resource("http://h/cars/1").await.unwrap(), 2);
        assert!(store.is_empty());
        // The pattern index is cleaned up with the entries.
        assert_eq!(store.remove_route_pattern("/cars/:id").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn validator_store_replaces_rather_than_mutates() {
        let store = MemoryValidatorStore::new();
        let k = key("http://h/cars/1", "/cars/:id", "a");
        store.put(&k, validator("v1")).await.unwrap();
        store.put(&k, validator("v2")).await.unwrap();
        assert_eq!(store.get(&k).await.unwrap().unwrap().etag().opaque(), "v2");
        assert_eq!(store.len(), 1);
    }
}
