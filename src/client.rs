//! Client-side caching handler — serve fresh hits locally, revalidate stale
//! ones with conditional requests.
//!
//! [`CachingClient`] wraps an [`Upstream`] transport. Every exchange walks a
//! small state machine: non-GET/HEAD traffic bypasses the cache (and
//! invalidates what it touched on success), cache misses forward unmodified
//! and store cacheable outcomes, fresh hits never reach the network, and
//! stale hits are revalidated with `If-None-Match`/`If-Modified-Since` — a
//! `304 Not Modified` answer is merged back onto the stored body so the
//! caller always observes a full response.
//!
//! Transport failures pass through untouched and never mutate the store.
//! Store failures degrade: a failed read is a miss, a failed write is
//! logged and the response is returned anyway.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::freshness::{self, Freshness};
use crate::http::response::ResponseError;
use crate::http::{Request, Response, StatusCode};
use crate::key::{CacheKey, VaryStore};
use crate::store::{CachedResponse, ResponseStore, ValidatorStore};
use crate::trace::{CacheTrace, TRACE_HEADER};
use crate::validator::EntityTag;

/// Errors crossing the upstream transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream sent an unparseable response: {0}")]
    BadResponse(#[from] ResponseError),

    #[error("connection closed before a complete response arrived")]
    Truncated,
}

/// The transport the caching handler forwards through.
///
/// Implementations must return fully-buffered responses: the handler only
/// commits a store write once the complete body is in hand, so a cancelled
/// exchange can never leave a partially written entry.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Sends a request and returns the complete response.
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}

/// Plain TCP transport: one connection per exchange, response buffered to
/// completion.
///
/// The read loop mirrors the server side: accumulate into a `BytesMut`,
/// re-attempt a parse as bytes arrive, and stop once `Content-Length` bytes
/// of body are buffered (or the peer closes a close-delimited response).
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    addr: String,
}

impl HttpUpstream {
    /// Creates a transport that connects to `addr` (e.g. `"127.0.0.1:8080"`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, mut request: Request) -> Result<Response, TransportError> {
        // One exchange per connection; ask the peer to close when done so
        // close-delimited bodies terminate.
        request.headers_mut().set("Connection", "close");

        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(&request.into_bytes()).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(4096);
        loop {
            let bytes_read = stream.read_buf(&mut buf).await?;
            let eof = bytes_read == 0;

            match Response::parse(&buf) {
                Ok((response, body_offset)) => match response.content_length() {
                    Some(len) if buf.len() >= body_offset + len => {
                        // Drop anything past the declared body length.
                        let (response, _) = Response::parse(&buf[..body_offset + len])?;
                        return Ok(response);
                    }
                    Some(_) if eof => return Err(TransportError::Truncated),
                    Some(_) => continue,
                    None if eof => return Ok(response),
                    None => continue,
                },
                Err(ResponseError::Incomplete) if !eof => continue,
                Err(ResponseError::Incomplete) => return Err(TransportError::Truncated),
                Err(e) => return Err(TransportError::BadResponse(e)),
            }
        }
    }
}

/// The client-side caching handler.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use revalid::client::{CachingClient, HttpUpstream};
/// use revalid::http::{Method, Request};
/// use revalid::store::{MemoryResponseStore, MemoryValidatorStore};
///
/// # async fn example() -> Result<(), revalid::client::TransportError> {
/// let client = CachingClient::new(
///     HttpUpstream::new("127.0.0.1:8080"),
///     Arc::new(MemoryResponseStore::new()),
///     Arc::new(MemoryValidatorStore::new()),
/// );
///
/// let request = Request::new(Method::Get, "/api/cars/42").header("Host", "127.0.0.1:8080");
/// let response = client.execute(request).await?;
/// # Ok(())
/// # }
/// ```
pub struct CachingClient<U> {
    upstream: U,
    responses: Arc<dyn ResponseStore>,
    validators: Arc<dyn ValidatorStore>,
    vary: Arc<VaryStore>,
}

impl<U: Upstream> CachingClient<U> {
    /// Creates a caching handler over the given transport and stores, with
    /// the default vary configuration (`["Accept"]`).
    pub fn new(
        upstream: U,
        responses: Arc<dyn ResponseStore>,
        validators: Arc<dyn ValidatorStore>,
    ) -> Self {
        Self {
            upstream,
            responses,
            validators,
            vary: Arc::new(VaryStore::new()),
        }
    }

    /// Replaces the vary store (shared so callers can declare per-resource
    /// vary sets after construction).
    #[must_use]
    pub fn with_vary(mut self, vary: Arc<VaryStore>) -> Self {
        self.vary = vary;
        self
    }

    /// Executes one exchange through the cache.
    ///
    /// Transport errors propagate to the caller unchanged; no store
    /// mutation happens on that path.
    pub async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        if !request.method().is_cacheable() {
            return self.bypass(request).await;
        }

        // Route patterns are a server-side handle; client keys carry none.
        let key = CacheKey::from_request(&request, "", &self.vary);

        let cached = match self.responses.get(&key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "response store lookup failed — treating as miss");
                None
            }
        };

        match cached {
            None => {
                debug!(uri = %key.resource_uri(), "cache miss — forwarding");
                let response = self.upstream.send(request).await?;
                self.store_outcome(&key, response).await
            }
            Some(entry) => {
                match freshness::evaluate(&entry.headers_map(), entry.stored_at, SystemTime::now())
                {
                    Freshness::Fresh => {
                        debug!(uri = %key.resource_uri(), "fresh hit — serving from store");
                        Ok(fresh_hit(&entry))
                    }
                    Freshness::Stale | Freshness::MustRevalidate => {
                        self.revalidate(request, &key, entry).await
                    }
                }
            }
        }
    }

    // Non-GET/HEAD traffic: forward unconditionally; a successful mutation
    // invalidates every stored entry for the resource, without blocking the
    // response on the invalidation completing.
    async fn bypass(&self, request: Request) -> Result<Response, TransportError> {
        let resource_uri = request.resource_uri();
        let is_mutation = request.method().is_mutation();

        let response = self.upstream.send(request).await?;

        if is_mutation && response.status().is_success() {
            debug!(uri = %resource_uri, "mutation succeeded — invalidating cached entries");
            let responses = Arc::clone(&self.responses);
            let validators = Arc::clone(&self.validators);
            tokio::spawn(async move {
                if let Err(e) = responses.remove_resource(&resource_uri).await {
                    warn!(error = %e, uri = %resource_uri, "response invalidation failed");
                }
                if let Err(e) = validators.remove_resource(&resource_uri).await {
                    warn!(error = %e, uri = %resource_uri, "validator invalidation failed");
                }
            });
        }

        Ok(response)
    }

    // Stale entry: attach conditional headers and ask the origin whether the
    // stored representation is still current.
    async fn revalidate(
        &self,
        request: Request,
        key: &CacheKey,
        mut entry: CachedResponse,
    ) -> Result<Response, TransportError> {
        let mut conditional = request;
        let etag = entry.header("etag").and_then(EntityTag::parse);

        // Entity tags take precedence; Last-Modified is the fallback when
        // no tag exists.
        if let Some(tag) = &etag {
            conditional
                .headers_mut()
                .set("If-None-Match", tag.to_string());
        } else if let Some(lm) = entry.header("last-modified") {
            let lm = lm.to_owned();
            conditional.headers_mut().set("If-Modified-Since", lm);
        }

        debug!(uri = %key.resource_uri(), "stale entry — revalidating upstream");
        let response = self.upstream.send(conditional).await?;

        if response.status() == StatusCode::NotModified {
            // The stored representation is current: refresh its metadata
            // from the 304 and serve the stored body under the original
            // status.
            for name in ["date", "cache-control", "expires", "etag", "last-modified"] {
                if let Some(value) = response.headers().get(name) {
                    let value = value.to_owned();
                    entry.set_header(name, value);
                }
            }
            entry.stored_at = SystemTime::now();

            if let Err(e) = self.responses.put(key, entry.clone()).await {
                warn!(error = %e, "store refresh after 304 failed");
            }

            let mut merged = entry.to_response();
            CacheTrace {
                validation_applied: true,
                validation_matched: true,
                short_circuited: false,
                query_made: false,
            }
            .apply(merged.headers_mut());
            return Ok(merged);
        }

        // Anything other than 304 is a full answer: same outcome as a miss.
        self.store_outcome(key, response).await
    }

    // A complete upstream response: persist it when cacheable, drop the
    // entry when it no longer is, and hand it to the caller either way.
    async fn store_outcome(
        &self,
        key: &CacheKey,
        response: Response,
    ) -> Result<Response, TransportError> {
        if freshness::response_cacheable(response.status(), response.headers()) {
            let mut cached = CachedResponse::capture(&response, SystemTime::now());
            // The upstream's trace describes its exchange, not a later one.
            cached.remove_header(TRACE_HEADER);
            if let Err(e) = self.responses.put(key, cached).await {
                warn!(error = %e, "response store write failed — returning uncached");
            }
        } else if let Err(e) = self.responses.remove(key).await {
            warn!(error = %e, "response store removal failed");
        }
        Ok(response)
    }
}

// Rebuild a response from the stored entry; the trace header records that
// no upstream call was made.
fn fresh_hit(entry: &CachedResponse) -> Response {
    let mut response = entry.to_response();
    CacheTrace {
        validation_applied: false,
        validation_matched: false,
        short_circuited: true,
        query_made: false,
    }
    .apply(response.headers_mut());
    response
}
