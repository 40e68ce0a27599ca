//! Cache key derivation — Vary-aware, deterministic, stable across restarts.
//!
//! A [`CacheKey`] identifies one cacheable variant of a resource: the
//! normalized resource URI, the logical route pattern (the handle bulk
//! invalidation works on), and the values of the request headers the
//! resource has declared in its Vary set. The physical store key is a
//! SHA-256 digest of those components, so the same request always lands on
//! the same entry no matter which process computed the key.

use std::collections::HashMap;
use std::sync::RwLock;

use sha2::{Digest, Sha256};

use crate::http::{Headers, Method, Request};

/// Identifies a cacheable request variant.
///
/// Computed per request, never mutated, and discarded once the exchange
/// completes; only the digest is used as the physical store key.
///
/// # Examples
///
/// ```
/// use revalid::http::{Headers, Method};
/// use revalid::key::CacheKey;
///
/// let mut headers = Headers::new();
/// headers.insert("Accept", "application/json");
///
/// let vary = ["accept".to_string()];
/// let a = CacheKey::compute(&Method::Get, "http://h/api/cars/1", "/api/cars/:id", &headers, &vary);
/// let b = CacheKey::compute(&Method::Get, "http://h/api/cars/1", "/api/cars/:id", &headers, &vary);
/// assert_eq!(a.hash(), b.hash());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource_uri: String,
    route_pattern: String,
    vary_values: Vec<String>,
    hash: String,
}

impl CacheKey {
    /// Computes a cache key from its raw components.
    ///
    /// Vary header names are sorted case-insensitively before extraction,
    /// so declaration order never affects the digest. An absent header
    /// contributes the empty string; a multi-valued header contributes its
    /// values joined in transport order.
    pub fn compute(
        method: &Method,
        resource_uri: &str,
        route_pattern: &str,
        request_headers: &Headers,
        vary_header_names: &[String],
    ) -> Self {
        let mut names: Vec<String> = vary_header_names
            .iter()
            .map(|n| n.to_ascii_lowercase())
            .collect();
        names.sort();
        names.dedup();

        let vary_values: Vec<String> = names
            .iter()
            .map(|name| {
                request_headers
                    .get_all(name)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect();

        // One component per line; header values cannot contain line breaks,
        // so the concatenation is unambiguous.
        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(resource_uri.as_bytes());
        hasher.update(b"\n");
        hasher.update(route_pattern.as_bytes());
        for (name, value) in names.iter().zip(&vary_values) {
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
        }
        let hash = hex(&hasher.finalize());

        Self {
            resource_uri: resource_uri.to_owned(),
            route_pattern: route_pattern.to_owned(),
            vary_values,
            hash,
        }
    }

    /// Computes the key for a request: the vary set is looked up in the
    /// store (exact URI first, then route pattern, then the default set).
    pub fn from_request(request: &Request, route_pattern: &str, vary: &VaryStore) -> Self {
        let resource_uri = request.resource_uri();
        let names = vary.names_for(&resource_uri, route_pattern);
        Self::compute(
            request.method(),
            &resource_uri,
            route_pattern,
            request.headers(),
            &names,
        )
    }

    /// Returns the normalized absolute resource URI.
    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }

    /// Returns the logical route pattern (empty when none was known).
    pub fn route_pattern(&self) -> &str {
        &self.route_pattern
    }

    /// Returns the extracted vary header values, in sorted-name order.
    pub fn vary_values(&self) -> &[String] {
        &self.vary_values
    }

    /// Returns the hex digest used as the physical store key.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(64), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Maps resources to the request header names whose values vary their
/// representation.
///
/// Declarations can target an exact resource URI or a whole route pattern;
/// lookups fall back to the configured default set (`["Accept"]` unless
/// overridden) when no declaration exists.
#[derive(Debug)]
pub struct VaryStore {
    default: Vec<String>,
    inner: RwLock<VaryEntries>,
}

#[derive(Debug, Default)]
struct VaryEntries {
    by_uri: HashMap<String, Vec<String>>,
    by_pattern: HashMap<String, Vec<String>>,
}

impl VaryStore {
    /// Creates a store with the standard default vary set, `["Accept"]`.
    pub fn new() -> Self {
        Self::with_default(["Accept"])
    }

    /// Creates a store with a custom default vary set.
    pub fn with_default<I, S>(default: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            default: default.into_iter().map(Into::into).collect(),
            inner: RwLock::new(VaryEntries::default()),
        }
    }

    /// Declares the vary set for an exact resource URI.
    pub fn declare_resource<I, S>(&self, resource_uri: impl Into<String>, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names.into_iter().map(Into::into).collect();
        self.inner
            .write()
            .expect("vary store lock poisoned")
            .by_uri
            .insert(resource_uri.into(), names);
    }

    /// Declares the vary set for every resource under a route pattern.
    pub fn declare_pattern<I, S>(&self, route_pattern: impl Into<String>, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names.into_iter().map(Into::into).collect();
        self.inner
            .write()
            .expect("vary store lock poisoned")
            .by_pattern
            .insert(route_pattern.into(), names);
    }

    /// Resolves the vary set for a resource: exact URI, else route pattern,
    /// else the default set.
    pub fn names_for(&self, resource_uri: &str, route_pattern: &str) -> Vec<String> {
        let entries = self.inner.read().expect("vary store lock poisoned");
        entries
            .by_uri
            .get(resource_uri)
            .or_else(|| entries.by_pattern.get(route_pattern))
            .unwrap_or(&self.default)
            .clone()
    }
}

impl Default for VaryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        let mut h = Headers::new();
        for (name, value) in pairs {
            h.insert(*name, *value);
        }
        h
    }

    const VARY: &[&str] = &["Accept", "Accept-Language"];

    fn vary() -> Vec<String> {
        VARY.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_inputs_identical_hash() {
        let h = headers(&[("Accept", "application/json")]);
        let a = CacheKey::compute(&Method::Get, "http://h/cars/1", "/cars/:id", &h, &vary());
        let b = CacheKey::compute(&Method::Get, "http://h/cars/1", "/cars/:id", &h, &vary());
        assert_eq!(a, b);
        assert_eq!(a.hash().len(), 64);
    }

    #[test]
    fn vary_relevant_header_changes_hash() {
        let a = CacheKey::compute(
            &Method::Get,
            "http://h/cars/1",
            "/cars/:id",
            &headers(&[("Accept", "application/json")]),
            &vary(),
        );
        let b = CacheKey::compute(
            &Method::Get,
            "http://h/cars/1",
            "/cars/:id",
            &headers(&[("Accept", "text/xml")]),
            &vary(),
        );
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn irrelevant_header_does_not_change_hash() {
        let a = CacheKey::compute(
            &Method::Get,
            "http://h/cars/1",
            "/cars/:id",
            &headers(&[("Accept", "application/json"), ("X-Request-Id", "1")]),
            &vary(),
        );
        let b = CacheKey::compute(
            &Method::Get,
            "http://h/cars/1",
            "/cars/:id",
            &headers(&[("Accept", "application/json"), ("X-Request-Id", "2")]),
            &vary(),
        );
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn header_name_case_is_insensitive() {
        let h = headers(&[("ACCEPT", "application/json")]);
        let lower = CacheKey::compute(
            &Method::Get,
            "http://h/cars/1",
            "/cars/:id",
            &h,
            &["accept".to_string()],
        );
        let upper = CacheKey::compute(
            &Method::Get,
            "http://h/cars/1",
            "/cars/:id",
            &h,
            &["Accept".to_string()],
        );
        assert_eq!(lower.hash(), upper.hash());
    }

    #[test]
    fn vary_declaration_order_is_irrelevant() {
        let h = headers(&[("Accept", "a"), ("Accept-Language", "de")]);
        let forward = CacheKey::compute(&Method::Get, "http://h/x", "/x", &h, &vary());
        let reversed: Vec<String> = VARY.iter().rev().map(|s| s.to_string()).collect();
        let backward = CacheKey::compute(&Method::Get, "http://h/x", "/x", &h, &reversed);
        assert_eq!(forward.hash(), backward.hash());
    }

    #[test]
    fn absent_vary_header_contributes_empty_string() {
        let key = CacheKey::compute(
            &Method::Get,
            "http://h/x",
            "/x",
            &headers(&[("Accept", "a")]),
            &vary(),
        );
        assert_eq!(key.vary_values(), ["a".to_string(), String::new()]);
    }

    #[test]
    fn method_is_part_of_the_key() {
        let h = headers(&[]);
        let get = CacheKey::compute(&Method::Get, "http://h/x", "/x", &h, &vary());
        let head = CacheKey::compute(&Method::Head, "http://h/x", "/x", &h, &vary());
        assert_ne!(get.hash(), head.hash());
    }

    #[test]
    fn vary_store_resolution_order() {
        let store = VaryStore::new();
        assert_eq!(store.names_for("http://h/a", "/a"), vec!["Accept"]);

        store.declare_pattern("/cars/:id", ["Accept-Language"]);
        assert_eq!(
            store.names_for("http://h/cars/1", "/cars/:id"),
            vec!["Accept-Language"]
        );

        store.declare_resource("http://h/cars/1", ["Accept-Encoding"]);
        assert_eq!(
            store.names_for("http://h/cars/1", "/cars/:id"),
            vec!["Accept-Encoding"]
        );
        // Other resources under the pattern keep the pattern set.
        assert_eq!(
            store.names_for("http://h/cars/2", "/cars/:id"),
            vec!["Accept-Language"]
        );
    }
}
