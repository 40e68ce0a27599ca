//! Per-route cache policy — explicit configuration attached at route
//! registration.
//!
//! Instead of annotations discovered at runtime, a route that wants its
//! responses cached declares a [`RouteCachePolicy`] when it is registered.
//! The validation pipeline consults the policy of the matched route and
//! renders it into the response's `Cache-Control` header.

use crate::freshness::{CacheControl, CacheDirective};

/// Cache behavior for every response produced by one route.
///
/// # Examples
///
/// ```
/// use revalid::policy::RouteCachePolicy;
///
/// let policy = RouteCachePolicy::public(300).with_must_revalidate();
/// assert_eq!(policy.to_header_value(), "public, max-age=300, must-revalidate");
///
/// assert_eq!(RouteCachePolicy::no_store().to_header_value(), "no-store");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteCachePolicy {
    /// Freshness lifetime granted to clients, in seconds.
    pub max_age_secs: Option<u64>,
    /// Restrict storage to private caches.
    pub is_private: bool,
    /// Stale copies must be revalidated before reuse.
    pub must_revalidate: bool,
    /// Forbid storage entirely.
    pub no_store: bool,
}

impl RouteCachePolicy {
    /// Publicly cacheable for `max_age_secs` seconds.
    pub fn public(max_age_secs: u64) -> Self {
        Self {
            max_age_secs: Some(max_age_secs),
            ..Self::default()
        }
    }

    /// Cacheable by the requesting client only, for `max_age_secs` seconds.
    pub fn private(max_age_secs: u64) -> Self {
        Self {
            max_age_secs: Some(max_age_secs),
            is_private: true,
            ..Self::default()
        }
    }

    /// Responses must not be stored.
    pub fn no_store() -> Self {
        Self {
            no_store: true,
            ..Self::default()
        }
    }

    /// Adds the `must-revalidate` requirement.
    #[must_use]
    pub fn with_must_revalidate(mut self) -> Self {
        self.must_revalidate = true;
        self
    }

    /// Builds the Cache-Control model this policy stands for.
    pub fn cache_control(&self) -> CacheControl {
        if self.no_store {
            return CacheControl::new().directive(CacheDirective::NoStore);
        }

        let mut cc = CacheControl::new().directive(if self.is_private {
            CacheDirective::Private
        } else {
            CacheDirective::Public
        });
        if let Some(secs) = self.max_age_secs {
            cc = cc.directive(CacheDirective::MaxAge(secs));
        }
        if self.must_revalidate {
            cc = cc.directive(CacheDirective::MustRevalidate);
        }
        cc
    }

    /// Renders the `Cache-Control` header value.
    pub fn to_header_value(&self) -> String {
        self.cache_control().to_header_value()
    }
}
