//! Server-side validation pipeline — answer conditional requests without
//! running business logic.
//!
//! [`ValidationStage`] is a [`Middleware`] that sits in front of the routed
//! handler. For cacheable requests it obtains the current validator for the
//! target resource (from an async [`ValidatorQuery`] provider, else from the
//! validator store) and compares it against the request's preconditions:
//!
//! - a matching `If-None-Match`/`If-Modified-Since` on GET/HEAD is answered
//!   with a bare `304 Not Modified` — the handler is never invoked;
//! - a mismatched `If-Match`/`If-Unmodified-Since` on PUT/PATCH/DELETE is
//!   rejected with `412 Precondition Failed`, again without invoking the
//!   handler;
//! - otherwise the handler runs, and a cacheable result is tagged with a
//!   fresh `ETag` + `Last-Modified` (resolved from the response's view model
//!   through the typed [`ValidatorResolvers`] registry, or derived by
//!   hashing the body), the route's cache policy, and the trace header.
//!
//! Requests that are not cacheable at all — non-GET/HEAD without
//! preconditions, an `Authorization` header, `no-cache` — pass through
//! unmodified. Handler faults are never intercepted: this stage only
//! decorates responses the handler actually produced.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::context::Context;
use crate::freshness::response_cacheable;
use crate::http::{Headers, Method, Response, StatusCode};
use crate::key::{self, CacheKey, VaryStore};
use crate::middleware::{Middleware, Next};
use crate::store::ValidatorStore;
use crate::trace::CacheTrace;
use crate::validator::{self, EntityTag, TimedEntityTag};

/// Cheaply fetches the current validator for a resource without running its
/// handler.
///
/// Registered once at startup; `None` means the provider cannot answer for
/// this resource and the stage falls back to the validator store.
#[async_trait]
pub trait ValidatorQuery: Send + Sync {
    /// Returns the resource's current validator, if this provider knows it.
    async fn current(&self, resource_uri: &str) -> Option<TimedEntityTag>;
}

type Resolver = Box<dyn Fn(&(dyn Any + Send + Sync)) -> Option<TimedEntityTag> + Send + Sync>;

/// Typed registry mapping view-model types to validator extraction
/// functions.
///
/// Populated once at startup and consulted per response: when a handler
/// attaches a view model ([`Response::with_model`]), the resolver registered
/// for that concrete type derives the validator directly instead of hashing
/// the serialized body.
///
/// # Examples
///
/// ```
/// use std::time::SystemTime;
/// use revalid::validate::ValidatorResolvers;
/// use revalid::validator::{EntityTag, TimedEntityTag};
///
/// struct Car { version: u64, updated_at: SystemTime }
///
/// let mut resolvers = ValidatorResolvers::new();
/// resolvers.register::<Car, _>(|car| {
///     TimedEntityTag::new(EntityTag::strong(car.version.to_string()), car.updated_at)
/// });
/// ```
#[derive(Default)]
pub struct ValidatorResolvers {
    map: HashMap<TypeId, Resolver>,
}

impl ValidatorResolvers {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the resolver for view models of type `T`.
    pub fn register<T, F>(&mut self, resolve: F)
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> TimedEntityTag + Send + Sync + 'static,
    {
        self.map.insert(
            TypeId::of::<T>(),
            Box::new(move |any| any.downcast_ref::<T>().map(&resolve)),
        );
    }

    /// Resolves a validator from a type-erased view model, if a resolver is
    /// registered for its concrete type.
    pub fn resolve(&self, model: &(dyn Any + Send + Sync)) -> Option<TimedEntityTag> {
        self.map.get(&model.type_id()).and_then(|r| r(model))
    }

    /// Returns the number of registered resolvers.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` when no resolver is registered.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// The validation middleware stage.
pub struct ValidationStage {
    validators: Arc<dyn ValidatorStore>,
    vary: Arc<VaryStore>,
    query: Option<Arc<dyn ValidatorQuery>>,
    resolvers: Arc<ValidatorResolvers>,
}

impl ValidationStage {
    /// Creates a stage persisting validators into `validators`, with the
    /// default vary configuration, no query provider, and no resolvers.
    pub fn new(validators: Arc<dyn ValidatorStore>) -> Self {
        Self {
            validators,
            vary: Arc::new(VaryStore::new()),
            query: None,
            resolvers: Arc::new(ValidatorResolvers::new()),
        }
    }

    /// Uses a shared vary store for key derivation.
    #[must_use]
    pub fn with_vary(mut self, vary: Arc<VaryStore>) -> Self {
        self.vary = vary;
        self
    }

    /// Installs the async validator query provider.
    #[must_use]
    pub fn with_query(mut self, query: Arc<dyn ValidatorQuery>) -> Self {
        self.query = Some(query);
        self
    }

    /// Installs the view-model resolver registry.
    #[must_use]
    pub fn with_resolvers(mut self, resolvers: ValidatorResolvers) -> Self {
        self.resolvers = Arc::new(resolvers);
        self
    }

    // Pre-execution validator acquisition: provider first, store second.
    // The bool reports whether the provider was asked and answered.
    async fn current_validator(
        &self,
        resource_uri: &str,
        key: &CacheKey,
    ) -> (Option<TimedEntityTag>, bool) {
        if let Some(query) = &self.query {
            if let Some(validator) = query.current(resource_uri).await {
                return (Some(validator), true);
            }
        }
        match self.validators.get(key).await {
            Ok(validator) => (validator, false),
            Err(e) => {
                warn!(error = %e, "validator store lookup failed — treating as absent");
                (None, false)
            }
        }
    }
}

impl Middleware for ValidationStage {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let validators = Arc::clone(&self.validators);
        let vary = Arc::clone(&self.vary);
        let query = self.query.clone();
        let resolvers = Arc::clone(&self.resolvers);

        Box::pin(async move {
            let stage = ValidationStage {
                validators,
                vary,
                query,
                resolvers,
            };
            stage.run(ctx, next).await
        })
    }
}

impl ValidationStage {
    async fn run(&self, ctx: Context, next: Next) -> Response {
        let request = ctx.request();
        let method = request.method().clone();
        let headers = request.headers().clone();
        let resource_uri = request.resource_uri();
        let route_pattern = ctx.route_pattern().unwrap_or("").to_owned();

        let guarded_mutation = method.is_mutation()
            && (headers.contains("if-match") || headers.contains("if-unmodified-since"));

        if !method.is_cacheable() && !guarded_mutation {
            return next.run(ctx).await;
        }

        if method.is_cacheable() && not_cacheable_request(&headers) {
            debug!(uri = %resource_uri, "request opted out of validation — passing through");
            return next.run(ctx).await;
        }

        // Validators live under the resource's GET variant: HEAD shares it,
        // and a guarded mutation checks its precondition against it.
        let names = self.vary.names_for(&resource_uri, &route_pattern);
        let key = CacheKey::compute(&Method::Get, &resource_uri, &route_pattern, &headers, &names);

        let (validator, query_made) = self.current_validator(&resource_uri, &key).await;

        if guarded_mutation {
            return self
                .guard_mutation(ctx, next, &resource_uri, validator, query_made)
                .await;
        }

        if let Some(validator) = &validator {
            if not_modified(&headers, validator) {
                debug!(uri = %resource_uri, etag = %validator.etag(), "precondition matched — 304 without handler");
                let mut response = Response::new(StatusCode::NotModified)
                    .header("ETag", validator.etag().to_string())
                    .header("Last-Modified", validator.last_modified_http())
                    .header("Date", httpdate::fmt_http_date(SystemTime::now()));
                CacheTrace {
                    validation_applied: true,
                    validation_matched: true,
                    short_circuited: true,
                    query_made,
                }
                .apply(response.headers_mut());
                return response;
            }
        }

        // EXECUTE_AND_TAG: the handler runs; its faults are its own.
        let had_preconditions =
            headers.contains("if-none-match") || headers.contains("if-modified-since");
        let validation_applied = had_preconditions && validator.is_some();
        let policy = ctx.cache_policy().cloned();

        let mut response = next.run(ctx).await;

        if !response_cacheable(response.status(), response.headers()) {
            return response;
        }

        let model = response.take_model();
        if response.body_ref().is_empty() && model.is_none() {
            return response;
        }

        let fresh = model
            .as_deref()
            .and_then(|m| self.resolvers.resolve(m))
            .unwrap_or_else(|| digest_validator(response.body_ref()));

        response
            .headers_mut()
            .set("ETag", fresh.etag().to_string());
        response
            .headers_mut()
            .set("Last-Modified", fresh.last_modified_http());
        if let Some(policy) = policy {
            response
                .headers_mut()
                .set("Cache-Control", policy.to_header_value());
        }
        CacheTrace {
            validation_applied,
            validation_matched: false,
            short_circuited: false,
            query_made,
        }
        .apply(response.headers_mut());

        if let Err(e) = self.validators.put(&key, fresh).await {
            warn!(error = %e, uri = %resource_uri, "validator store write failed");
        }

        response
    }

    // PUT/PATCH/DELETE guarded by preconditions: reject on mismatch, run and
    // invalidate on success.
    async fn guard_mutation(
        &self,
        ctx: Context,
        next: Next,
        resource_uri: &str,
        validator: Option<TimedEntityTag>,
        query_made: bool,
    ) -> Response {
        if let Some(validator) = &validator {
            if precondition_failed(ctx.request().headers(), validator) {
                debug!(uri = %resource_uri, "precondition failed — 412 without handler");
                let mut response = Response::new(StatusCode::PreconditionFailed)
                    .header("ETag", validator.etag().to_string());
                CacheTrace {
                    validation_applied: true,
                    validation_matched: false,
                    short_circuited: true,
                    query_made,
                }
                .apply(response.headers_mut());
                return response;
            }
        }

        let response = next.run(ctx).await;

        // The representation changed: stored validators for it are obsolete.
        if response.status().is_success() {
            let validators = Arc::clone(&self.validators);
            let resource_uri = resource_uri.to_owned();
            tokio::spawn(async move {
                if let Err(e) = validators.remove_resource(&resource_uri).await {
                    warn!(error = %e, uri = %resource_uri, "validator invalidation failed");
                }
            });
        }

        response
    }
}

// Authorization and no-cache take the request out of validation entirely.
fn not_cacheable_request(headers: &Headers) -> bool {
    if headers.contains("authorization") {
        return true;
    }
    if headers
        .get("pragma")
        .is_some_and(|p| p.to_ascii_lowercase().contains("no-cache"))
    {
        return true;
    }
    headers
        .get("cache-control")
        .is_some_and(|cc| cc.to_ascii_lowercase().contains("no-cache"))
}

// GET/HEAD precondition comparison. Entity tags take precedence; the
// timestamp is only consulted when the request carries no tag list.
fn not_modified(headers: &Headers, validator: &TimedEntityTag) -> bool {
    if let Some(if_none_match) = headers.get("if-none-match") {
        return validator::list_matches(if_none_match, validator.etag(), false);
    }
    if let Some(if_modified_since) = headers.get("if-modified-since") {
        if let Ok(since) = httpdate::parse_http_date(if_modified_since) {
            return validator.last_modified() <= since;
        }
    }
    false
}

// Mutation precondition comparison: If-Match uses strong comparison.
// Malformed dates fail open (no precondition), matching the fail-closed
// parse rule for validators.
fn precondition_failed(headers: &Headers, validator: &TimedEntityTag) -> bool {
    if let Some(if_match) = headers.get("if-match") {
        return !validator::list_matches(if_match, validator.etag(), true);
    }
    if let Some(if_unmodified_since) = headers.get("if-unmodified-since") {
        if let Ok(since) = httpdate::parse_http_date(if_unmodified_since) {
            return validator.last_modified() > since;
        }
    }
    false
}

// Fallback validator: hash the serialized representation.
fn digest_validator(body: &[u8]) -> TimedEntityTag {
    let digest = Sha256::digest(body);
    TimedEntityTag::new(EntityTag::strong(key::hex(&digest)), SystemTime::now())
}
