//! Cache-Control interpretation and the fresh/stale decision.
//!
//! [`CacheControl`] models the common directive set (`no-cache`, `no-store`,
//! `must-revalidate`, `max-age`, `s-maxage`, `private`, `public`); unknown
//! tokens are carried opaquely and otherwise ignored. [`evaluate`] turns a
//! cached response's headers into a [`Freshness`] verdict.
//!
//! Directive precedence: explicit `max-age` (then `s-maxage`) wins over
//! `Expires`; `no-cache` and `must-revalidate` force revalidation regardless
//! of computed freshness; a response with no freshness information at all is
//! stale — this cache does not apply heuristic freshness.

use std::fmt;
use std::time::SystemTime;

use crate::http::{Headers, StatusCode};

/// A single Cache-Control directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDirective {
    /// Response may be stored by any cache.
    Public,
    /// Response is for a single user; shared caches must not store it.
    Private,
    /// Response must not be stored at all.
    NoStore,
    /// Stored response must be revalidated before every use.
    NoCache,
    /// Freshness lifetime in seconds.
    MaxAge(u64),
    /// Freshness lifetime in seconds for shared caches.
    SMaxAge(u64),
    /// Once stale, the response must not be used without revalidation.
    MustRevalidate,
    /// Any directive outside the common set, carried opaquely.
    Extension(String, Option<String>),
}

impl CacheDirective {
    /// Parses one directive token. Unknown tokens become
    /// [`CacheDirective::Extension`]; a malformed value on a known numeric
    /// directive yields `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();

        if let Some((key, value)) = s.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            return match key {
                "max-age" => value.parse().ok().map(CacheDirective::MaxAge),
                "s-maxage" => value.parse().ok().map(CacheDirective::SMaxAge),
                _ => Some(CacheDirective::Extension(
                    key.to_owned(),
                    Some(value.to_owned()),
                )),
            };
        }

        Some(match s.as_str() {
            "public" => CacheDirective::Public,
            "private" => CacheDirective::Private,
            "no-store" => CacheDirective::NoStore,
            "no-cache" => CacheDirective::NoCache,
            "must-revalidate" => CacheDirective::MustRevalidate,
            other => CacheDirective::Extension(other.to_owned(), None),
        })
    }
}

impl fmt::Display for CacheDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheDirective::Public => f.write_str("public"),
            CacheDirective::Private => f.write_str("private"),
            CacheDirective::NoStore => f.write_str("no-store"),
            CacheDirective::NoCache => f.write_str("no-cache"),
            CacheDirective::MaxAge(secs) => write!(f, "max-age={secs}"),
            CacheDirective::SMaxAge(secs) => write!(f, "s-maxage={secs}"),
            CacheDirective::MustRevalidate => f.write_str("must-revalidate"),
            CacheDirective::Extension(key, Some(value)) => write!(f, "{key}={value}"),
            CacheDirective::Extension(key, None) => f.write_str(key),
        }
    }
}

/// A parsed or constructed Cache-Control header.
///
/// # Examples
///
/// ```
/// use revalid::freshness::CacheControl;
///
/// let cc = CacheControl::parse("public, max-age=3600, must-revalidate");
/// assert_eq!(cc.max_age(), Some(3600));
/// assert!(cc.must_revalidate());
/// assert!(!cc.no_store());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: Vec<CacheDirective>,
}

impl CacheControl {
    /// Creates an empty Cache-Control.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a Cache-Control header value. Malformed members are dropped;
    /// an absent or empty header parses to no directives.
    pub fn parse(header: &str) -> Self {
        let directives = header
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .filter_map(CacheDirective::parse)
            .collect();
        Self { directives }
    }

    /// Reads and parses the `Cache-Control` header from a header map.
    pub fn from_headers(headers: &Headers) -> Self {
        headers
            .get("cache-control")
            .map(Self::parse)
            .unwrap_or_default()
    }

    /// Appends a directive.
    #[must_use]
    pub fn directive(mut self, directive: CacheDirective) -> Self {
        self.directives.push(directive);
        self
    }

    /// Renders the header value: comma-joined directives.
    pub fn to_header_value(&self) -> String {
        self.directives
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Returns `true` when no directives are present.
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// `no-store` present: storage is forbidden.
    pub fn no_store(&self) -> bool {
        self.directives.contains(&CacheDirective::NoStore)
    }

    /// `no-cache` present: every use requires revalidation.
    pub fn no_cache(&self) -> bool {
        self.directives.contains(&CacheDirective::NoCache)
    }

    /// `must-revalidate` present.
    pub fn must_revalidate(&self) -> bool {
        self.directives.contains(&CacheDirective::MustRevalidate)
    }

    /// `private` present.
    pub fn is_private(&self) -> bool {
        self.directives.contains(&CacheDirective::Private)
    }

    /// The `max-age` value in seconds, if present.
    pub fn max_age(&self) -> Option<u64> {
        self.directives.iter().find_map(|d| match d {
            CacheDirective::MaxAge(secs) => Some(*secs),
            _ => None,
        })
    }

    /// The `s-maxage` value in seconds, if present.
    pub fn s_maxage(&self) -> Option<u64> {
        self.directives.iter().find_map(|d| match d {
            CacheDirective::SMaxAge(secs) => Some(*secs),
            _ => None,
        })
    }
}

/// Verdict on a cached response at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within its freshness lifetime; may be served without contacting the
    /// origin.
    Fresh,
    /// Past its freshness lifetime; revalidate before use.
    Stale,
    /// Directives force revalidation regardless of age.
    MustRevalidate,
}

/// Evaluates a cached response's freshness at `now`.
///
/// `stored_at` anchors the age computation when the response carries no
/// `Date` header.
pub fn evaluate(headers: &Headers, stored_at: SystemTime, now: SystemTime) -> Freshness {
    let cc = CacheControl::from_headers(headers);

    if cc.no_cache() || cc.must_revalidate() {
        return Freshness::MustRevalidate;
    }

    let reference = headers
        .get("date")
        .and_then(|s| httpdate::parse_http_date(s).ok())
        .unwrap_or(stored_at);

    let age = now
        .duration_since(reference)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let lifetime = cc
        .max_age()
        .or_else(|| cc.s_maxage())
        .or_else(|| expires_lifetime(headers, reference));

    match lifetime {
        Some(lifetime) if age < lifetime => Freshness::Fresh,
        _ => Freshness::Stale,
    }
}

// Lifetime from the Expires header, relative to the response's Date.
fn expires_lifetime(headers: &Headers, reference: SystemTime) -> Option<u64> {
    let expires = httpdate::parse_http_date(headers.get("expires")?).ok()?;
    Some(
        expires
            .duration_since(reference)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    )
}

/// The shared response-cacheability rule.
///
/// A response may enter the cache (client side) or receive a validator
/// (server side) when its status is one of 200, 201, 202, 301, 304, it sets
/// no cookie, and storage is not forbidden. `private` does not forbid
/// storage here: the client handler is a private cache, and a validator is
/// not a secret.
pub fn response_cacheable(status: StatusCode, headers: &Headers) -> bool {
    const CACHEABLE: [StatusCode; 5] = [
        StatusCode::Ok,
        StatusCode::Created,
        StatusCode::Accepted,
        StatusCode::MovedPermanently,
        StatusCode::NotModified,
    ];

    CACHEABLE.contains(&status)
        && !headers.contains("set-cookie")
        && !CacheControl::from_headers(headers).no_store()
}
