//! Request routing — map URL patterns and HTTP methods to handler functions.
//!
//! This module provides [`Router`], which matches incoming HTTP requests against
//! registered routes. Three pattern styles are supported:
//!
//! | Pattern              | Example match              | Captured params              |
//! |----------------------|----------------------------|------------------------------|
//! | `/users`             | `/users`                   | *(none)*                     |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                  |
//! | `/files/*`           | `/files/docs/readme.txt`   | `wildcard → "/docs/readme.txt"` |
//!
//! Trailing slashes are normalized on both patterns and incoming paths, so `/users/` and
//! `/users` are treated as equivalent.
//!
//! Routes are matched in registration order; the first route whose method and pattern both
//! match the incoming request wins.
//!
//! Matching is split from dispatch: [`Router::resolve`] returns the matched
//! handler together with the route's pattern string and its optional
//! [`RouteCachePolicy`], so the middleware chain (validation stage included)
//! runs with full route metadata in the [`Context`]. The pattern string is
//! also the handle bulk cache invalidation operates on.

use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, PathParams};
use crate::policy::RouteCachePolicy;
use crate::{Method, Request, Response, StatusCode};

/// Type-erased, heap-allocated async handler that processes a [`Context`] and returns a
/// [`Response`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be cloned and shared across
/// threads without copying the underlying closure. In practice you never construct this
/// type directly — use [`Router::get`], [`Router::post`], and the other method-specific
/// helpers instead.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait automatically via the blanket impl
/// below.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    // Matches one exact path string, e.g. `/users`.
    Exact(String),
    // Matches a fixed number of segments where some may be named captures, e.g. `/users/:id`.
    Parameterized { segments: Vec<Segment> },
    // Matches any path that starts with the given prefix, e.g. `/files/*`.
    Wildcard(String),
}

impl Pattern {
    /// Parse a route pattern string into a `Pattern`.
    ///
    /// The pattern is classified as follows (checked in order):
    ///
    /// 1. Ends with `/*` → [`Pattern::Wildcard`] — matches any path sharing the prefix.
    /// 2. Contains `:` → [`Pattern::Parameterized`] — one or more named captures.
    /// 3. Otherwise → [`Pattern::Exact`] — literal path match.
    ///
    /// A trailing slash (other than on the root `/`) is stripped before classification so
    /// that `/users/` and `/users` compile to identical patterns.
    fn parse(pattern: &str) -> Self {
        let pattern = if pattern != "/" && pattern.ends_with('/') {
            &pattern[..pattern.len() - 1]
        } else {
            pattern
        };

        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if let Some(p) = s.strip_prefix(':') {
                        Segment::Parameter(p.to_string())
                    } else {
                        Segment::Static(s.to_string())
                    }
                })
                .collect();

            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    // Try to match `path` against this pattern, returning extracted [`PathParams`] on success.
    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = if path != "/" && path.ends_with('/') {
            &path[..path.len() - 1]
        } else {
            path
        };

        match self {
            Pattern::Exact(p) => {
                if p == path {
                    Some(PathParams::new())
                } else {
                    None
                }
            }
            Pattern::Parameterized { segments } => {
                let mut params = PathParams::new();
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

                if segments.len() != path_segments.len() {
                    return None;
                }

                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) => {
                            if s != path_seg {
                                return None;
                            }
                        }
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), path_seg.to_string());
                        }
                    }
                }

                Some(params)
            }
            Pattern::Wildcard(prefix) => {
                if let Some(suffix) = path.strip_prefix(prefix) {
                    let mut params = PathParams::new();
                    params.insert("wildcard".to_string(), suffix.to_string());
                    Some(params)
                } else {
                    None
                }
            }
        }
    }
}

// A single registered route binding a method + pattern to a handler, plus the
// route's cache policy when one was declared.
struct Route {
    method: Method,
    pattern: Pattern,
    pattern_str: String,
    policy: Option<RouteCachePolicy>,
    handler: Handler,
}

impl Route {
    fn new(
        method: Method,
        pattern: &str,
        policy: Option<RouteCachePolicy>,
        handler: Handler,
    ) -> Self {
        Self {
            method,
            pattern: Pattern::parse(pattern),
            pattern_str: pattern.to_string(),
            policy,
            handler,
        }
    }

    // Returns `Some(params)` when both the HTTP method and path pattern match, `None` otherwise.
    fn matches(&self, method: &Method, path: &str) -> Option<PathParams> {
        if &self.method == method {
            self.pattern.matches(path)
        } else {
            None
        }
    }
}

/// A successful route resolution: everything the app needs to build a
/// [`Context`] and run the middleware chain.
pub struct Matched {
    /// The route's handler, ready to be installed as the chain's terminal stage.
    pub handler: Handler,
    /// The route's pattern string, e.g. `/api/cars/:id`.
    pub pattern: String,
    /// Path parameters extracted from the concrete path.
    pub params: PathParams,
    /// The route's cache policy, when one was registered.
    pub policy: Option<RouteCachePolicy>,
}

/// HTTP request router that matches requests against registered handler functions.
///
/// Routes are evaluated in registration order; the first route whose HTTP method and path
/// pattern both match the incoming request is used.
///
/// # Examples
///
/// ```rust,no_run
/// use revalid::{Router, Response, StatusCode};
/// use revalid::policy::RouteCachePolicy;
/// use revalid::context::Context;
///
/// let mut router = Router::new();
///
/// router.get("/ping", |_ctx| async { Response::new(StatusCode::Ok) });
///
/// router.get_cached(
///     "/api/cars/:id",
///     RouteCachePolicy::public(300),
///     |ctx: Context| async move {
///         let id = ctx.params().get("id").unwrap_or("unknown").to_owned();
///         Response::new(StatusCode::Ok).body(id)
///     },
/// );
/// ```
pub struct Router {
    routes: Vec<Route>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a new, empty `Router` with no registered routes.
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register a handler for `GET` requests matching `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, None, handler);
    }

    /// Register a handler for `GET` requests matching `path`, with a cache
    /// policy applied to its responses by the validation stage.
    pub fn get_cached(
        &mut self,
        path: &str,
        policy: RouteCachePolicy,
        handler: impl IntoHandler,
    ) {
        self.add_route(Method::Get, path, Some(policy), handler);
    }

    /// Register a handler for `HEAD` requests matching `path`.
    pub fn head(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Head, path, None, handler);
    }

    /// Register a handler for `POST` requests matching `path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, path, None, handler);
    }

    /// Register a handler for `PUT` requests matching `path`.
    pub fn put(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Put, path, None, handler);
    }

    /// Register a handler for `DELETE` requests matching `path`.
    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Delete, path, None, handler);
    }

    /// Register a handler for `OPTIONS` requests matching `path`.
    pub fn options(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Options, path, None, handler);
    }

    /// Register a handler for `PATCH` requests matching `path`.
    pub fn patch(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Patch, path, None, handler);
    }

    // Erase the concrete handler type and store it as a `Handler` trait object.
    fn add_route(
        &mut self,
        method: Method,
        path: &str,
        policy: Option<RouteCachePolicy>,
        handler: impl IntoHandler,
    ) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route::new(method, path, policy, handler));
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Match `method` + `path` against the registered routes.
    ///
    /// Routes are tested in registration order; the first match wins. The
    /// returned [`Matched`] carries everything needed to run the request:
    /// handler, pattern string, extracted parameters, and cache policy.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<Matched> {
        for route in &self.routes {
            if let Some(params) = route.matches(method, path) {
                return Some(Matched {
                    handler: Arc::clone(&route.handler),
                    pattern: route.pattern_str.clone(),
                    params,
                    policy: route.policy.clone(),
                });
            }
        }
        None
    }

    /// Dispatch `request` directly to the first matching route and return its response.
    ///
    /// Convenience for uses without a middleware chain; the app composes
    /// [`resolve`](Self::resolve) with the chain instead. If no route
    /// matches, a `404 Not Found` response is returned.
    pub async fn route(&self, request: Request) -> Response {
        let path = request.path().to_owned();

        match self.resolve(request.method(), &path) {
            Some(matched) => {
                let ctx =
                    Context::with_route(request, matched.params, matched.pattern, matched.policy);
                (matched.handler)(ctx).await
            }
            None => Response::new(StatusCode::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Request;

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    // ── Pattern::parse ────────────────────────────────────────────────────────

    #[test]
    fn pattern_parse_root() {
        assert!(matches!(Pattern::parse("/"), Pattern::Exact(s) if s == "/"));
    }

    #[test]
    fn pattern_parse_exact() {
        assert!(matches!(Pattern::parse("/users"), Pattern::Exact(s) if s == "/users"));
    }

    #[test]
    fn pattern_parse_trailing_slash_stripped() {
        // "/users/" should be normalized to "/users"
        assert!(matches!(Pattern::parse("/users/"), Pattern::Exact(s) if s == "/users"));
    }

    #[test]
    fn pattern_parse_parameterized() {
        let pat = Pattern::parse("/users/:id/posts/:post_id");
        match pat {
            Pattern::Parameterized { segments } => {
                assert_eq!(segments.len(), 4);
                assert!(matches!(&segments[1], Segment::Parameter(s) if s == "id"));
                assert!(matches!(&segments[3], Segment::Parameter(s) if s == "post_id"));
            }
            other => panic!("expected Parameterized, got {other:?}"),
        }
    }

    #[test]
    fn pattern_parse_wildcard() {
        assert!(matches!(
            Pattern::parse("/files/*"),
            Pattern::Wildcard(s) if s == "/files"
        ));
    }

    // ── Pattern::matches ──────────────────────────────────────────────────────

    #[test]
    fn pattern_exact_match() {
        let pat = Pattern::parse("/users");
        assert!(pat.matches("/users").is_some());
        assert!(pat.matches("/users/").is_some());
        assert!(pat.matches("/posts").is_none());
    }

    #[test]
    fn pattern_param_extracts_values() {
        let pat = Pattern::parse("/users/:id/posts/:post_id");
        let params = pat.matches("/users/7/posts/99").unwrap();
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("post_id"), Some("99"));
    }

    #[test]
    fn pattern_param_wrong_segment_count() {
        let pat = Pattern::parse("/users/:id");
        assert!(pat.matches("/users").is_none());
        assert!(pat.matches("/users/42/extra").is_none());
    }

    #[test]
    fn pattern_wildcard_match() {
        let pat = Pattern::parse("/files/*");
        let params = pat.matches("/files/docs/readme.txt").unwrap();
        assert_eq!(params.get("wildcard"), Some("/docs/readme.txt"));
        assert!(pat.matches("/other/readme.txt").is_none());
    }

    // ── Router ────────────────────────────────────────────────────────────────

    #[test]
    fn router_starts_empty() {
        let router = Router::new();
        assert!(router.is_empty());
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn resolve_returns_route_metadata() {
        let mut router = Router::new();
        router.get_cached(
            "/cars/:id",
            RouteCachePolicy::public(60),
            |_ctx| async { Response::new(StatusCode::Ok) },
        );

        let matched = router.resolve(&Method::Get, "/cars/42").unwrap();
        assert_eq!(matched.pattern, "/cars/:id");
        assert_eq!(matched.params.get("id"), Some("42"));
        assert_eq!(matched.policy.unwrap().max_age_secs, Some(60));
    }

    #[test]
    fn resolve_without_policy() {
        let mut router = Router::new();
        router.get("/plain", |_ctx| async { Response::new(StatusCode::Ok) });
        let matched = router.resolve(&Method::Get, "/plain").unwrap();
        assert!(matched.policy.is_none());
    }

    #[test]
    fn resolve_misses_on_method_mismatch() {
        let mut router = Router::new();
        router.get("/hello", |_ctx| async { Response::new(StatusCode::Ok) });
        assert!(router.resolve(&Method::Post, "/hello").is_none());
    }

    #[tokio::test]
    async fn router_empty_returns_404() {
        let router = Router::new();
        let res = router.route(make_request("GET", "/")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn router_get_matches() {
        let mut router = Router::new();
        router.get("/hello", |_ctx| async { Response::new(StatusCode::Ok) });
        let res = router.route(make_request("GET", "/hello")).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn router_first_matching_route_wins() {
        let mut router = Router::new();
        router.get("/path", |_ctx| async { Response::new(StatusCode::Ok) });
        router.get("/path", |_ctx| async {
            Response::new(StatusCode::Accepted)
        });

        let res = router.route(make_request("GET", "/path")).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn router_handler_sees_route_context() {
        let mut router = Router::new();
        router.get("/users/:id", |ctx: Context| async move {
            let id = ctx.params().get("id").unwrap_or("").to_owned();
            let pattern = ctx.route_pattern().unwrap_or("").to_owned();
            Response::new(StatusCode::Ok).body(format!("{pattern}:{id}"))
        });
        let res = router.route(make_request("GET", "/users/42")).await;
        assert_eq!(res.body_ref(), b"/users/:id:42");
    }

    #[tokio::test]
    async fn router_method_variants_registered() {
        let mut router = Router::new();
        router.put("/r", |_ctx| async { Response::new(StatusCode::Ok) });
        router.delete("/r", |_ctx| async { Response::new(StatusCode::Ok) });
        router.patch("/r", |_ctx| async { Response::new(StatusCode::Ok) });
        router.options("/r", |_ctx| async { Response::new(StatusCode::Ok) });
        router.head("/r", |_ctx| async { Response::new(StatusCode::Ok) });
        assert_eq!(router.len(), 5);
        for method in ["PUT", "DELETE", "PATCH", "OPTIONS", "HEAD"] {
            assert_eq!(
                router.route(make_request(method, "/r")).await.status(),
                StatusCode::Ok
            );
        }
    }
}
