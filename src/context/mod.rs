//! Per-request context — route metadata, path parameters, and type-safe
//! request extensions.
//!
//! A [`Context`] is built by the app once a route has been resolved, so the
//! middleware chain (the validation stage in particular) can see the matched
//! route pattern and its cache policy *before* the handler runs. The
//! [`Extensions`] map injects per-request state into handlers without
//! requiring them to know about each other's types.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use crate::Request;
use crate::policy::RouteCachePolicy;

/// Type-erased request extensions map — used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value into the extensions map
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a value from the extensions map
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Get a mutable reference to a value from the extensions map
    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// Remove a value from the extensions map
    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Path parameters extracted from the matched route
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    /// Create a new empty parameters map
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value into the parameters map
    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    /// Get a value from the parameters map
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|value| value.as_str())
    }

    /// Remove a value from the parameters map
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }
}

/// Per-request context carrying the request, the matched route's metadata,
/// and type-safe extensions.
pub struct Context {
    request: Request,
    params: PathParams,
    route_pattern: Option<String>,
    cache_policy: Option<RouteCachePolicy>,
    extensions: Extensions,
}

impl Context {
    /// Create a context from a bare request (no route resolved).
    pub fn new(request: Request) -> Self {
        Self {
            request,
            params: PathParams::new(),
            route_pattern: None,
            cache_policy: None,
            extensions: Extensions::new(),
        }
    }

    /// Create a context with path parameters but no route metadata.
    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self {
            params,
            ..Self::new(request)
        }
    }

    /// Create a context for a resolved route: pattern, parameters, and the
    /// route's cache policy.
    pub fn with_route(
        request: Request,
        params: PathParams,
        route_pattern: impl Into<String>,
        cache_policy: Option<RouteCachePolicy>,
    ) -> Self {
        Self {
            request,
            params,
            route_pattern: Some(route_pattern.into()),
            cache_policy,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// The matched route's pattern string (e.g. `/api/cars/:id`), when a
    /// route was resolved. This is the handle bulk invalidation works on.
    pub fn route_pattern(&self) -> Option<&str> {
        self.route_pattern.as_deref()
    }

    /// The matched route's cache policy, when one was registered.
    pub fn cache_policy(&self) -> Option<&RouteCachePolicy> {
        self.cache_policy.as_ref()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Deserialize the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let body = self.request.body();
        serde_json::from_slice(body)
    }
}
