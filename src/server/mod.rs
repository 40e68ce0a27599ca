//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler
//! function. Supports HTTP/1.1 persistent connections (keep-alive) out of
//! the box. [`App`] composes a [`Router`] with an ordered middleware stack —
//! the validation stage among them — into a single handler the server can
//! host.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::middleware::{Middleware, MiddlewareHandler, Next, from_middleware};
use crate::router::Router;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// A router wrapped in an ordered middleware stack.
///
/// Route resolution happens *before* the chain runs, so every middleware —
/// the validation stage in particular — sees the matched route's pattern and
/// cache policy on the [`Context`]. The matched handler is installed as the
/// chain's terminal element; requests that match no route are answered with
/// `404 Not Found` without entering the chain.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use revalid::server::{App, Server};
/// use revalid::store::MemoryValidatorStore;
/// use revalid::validate::ValidationStage;
/// use revalid::policy::RouteCachePolicy;
/// use revalid::{Response, Router, StatusCode};
/// use revalid::context::Context;
///
/// #[tokio::main]
/// async fn main() -> Result<(), revalid::ServerError> {
///     let mut router = Router::new();
///     router.get_cached("/api/cars/:id", RouteCachePolicy::public(60), |ctx: Context| async move {
///         let id = ctx.params().get("id").unwrap_or("?").to_owned();
///         Response::new(StatusCode::Ok).body(format!("car {id}"))
///     });
///
///     let stage = ValidationStage::new(Arc::new(MemoryValidatorStore::new()));
///     let app = App::new(router).layer(Arc::new(stage));
///
///     Server::bind("127.0.0.1:8080").await?.serve(app).await
/// }
/// ```
pub struct App {
    router: Router,
    middlewares: Vec<MiddlewareHandler>,
}

impl App {
    /// Wraps a router with an empty middleware stack.
    pub fn new(router: Router) -> Self {
        Self {
            router,
            middlewares: Vec::new(),
        }
    }

    /// Appends a middleware to the stack. Layers run in the order they were
    /// added.
    #[must_use]
    pub fn layer<M>(mut self, middleware: Arc<M>) -> Self
    where
        M: Middleware + 'static,
    {
        self.middlewares.push(from_middleware(middleware));
        self
    }

    /// Resolves the route, builds the request context, and runs the chain.
    pub async fn handle(&self, request: Request) -> Response {
        let path = request.path().to_owned();

        match self.router.resolve(request.method(), &path) {
            Some(matched) => {
                let ctx =
                    Context::with_route(request, matched.params, matched.pattern, matched.policy);

                let handler = matched.handler;
                let terminal: MiddlewareHandler = Arc::new(move |ctx, _next| handler(ctx));

                let mut chain = self.middlewares.clone();
                chain.push(terminal);
                Next::new(chain).run(ctx).await
            }
            None => Response::new(StatusCode::NotFound),
        }
    }
}

/// The HTTP server.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests to a
/// handler function or an [`App`].
///
/// # Examples
///
/// ```rust,no_run
/// use revalid::server::Server;
/// use revalid::http::{Request, Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(|_req| async {
///         Response::new(StatusCode::Ok).body("Hello!")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves an [`App`] until the process is terminated.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn serve(self, app: App) -> Result<(), ServerError> {
        let app = Arc::new(app);
        self.run(move |request| {
            let app = Arc::clone(&app);
            async move { app.handle(request).await }
        })
        .await
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// The handler receives a [`Request`] and must return a [`Future`] that
    /// resolves to a [`Response`]. The handler is wrapped in an [`Arc`] and
    /// shared across all spawned Tokio tasks, so it must be `Send + Sync + 'static`.
    ///
    /// This method runs until the process is terminated or an unrecoverable
    /// listener error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "revalid listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        // Guard against excessively large requests.
        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large — sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        // Attempt to parse the buffered data as an HTTP request.
        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                // Headers not yet fully received — read more data.
                continue;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request — sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset + content_length;
        if buf.len() < total_needed {
            continue;
        }

        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request).await;
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close — shutting down");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RouteCachePolicy;
    use crate::store::MemoryValidatorStore;
    use crate::validate::ValidationStage;

    fn request(method: &str, path: &str, extra: &[(&str, &str)]) -> Request {
        let mut raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n");
        for (name, value) in extra {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        raw.push_str("\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    fn app() -> App {
        let mut router = Router::new();
        router.get_cached("/cars/:id", RouteCachePolicy::public(60), |ctx: Context| async move {
            let id = ctx.params().get("id").unwrap_or("?").to_owned();
            Response::new(StatusCode::Ok).body(format!("car {id}"))
        });

        let stage = ValidationStage::new(Arc::new(MemoryValidatorStore::new()));
        App::new(router).layer(Arc::new(stage))
    }

    #[tokio::test]
    async fn app_routes_through_the_chain() {
        let app = app();
        let response = app.handle(request("GET", "/cars/7", &[])).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.body_ref(), b"car 7");
        // The validation stage tagged the cacheable response.
        assert!(response.headers().contains("etag"));
        assert_eq!(
            response.headers().get("cache-control"),
            Some("public, max-age=60")
        );
    }

    #[tokio::test]
    async fn app_answers_404_for_unknown_routes() {
        let app = app();
        let response = app.handle(request("GET", "/nope", &[])).await;
        assert_eq!(response.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn app_short_circuits_conditional_repeat() {
        let app = app();
        let first = app.handle(request("GET", "/cars/7", &[])).await;
        let etag = first.headers().get("etag").unwrap().to_owned();

        let second = app
            .handle(request("GET", "/cars/7", &[("If-None-Match", &etag)]))
            .await;
        assert_eq!(second.status(), StatusCode::NotModified);
    }

    #[tokio::test]
    async fn head_requests_share_the_get_variant() {
        let mut router = Router::new();
        router.get("/doc", |_ctx| async { Response::new(StatusCode::Ok).body("body") });
        router.head("/doc", |_ctx| async { Response::new(StatusCode::Ok) });

        let validators = Arc::new(MemoryValidatorStore::new());
        let app = App::new(router).layer(Arc::new(ValidationStage::new(validators.clone())));

        let get = app.handle(request("GET", "/doc", &[])).await;
        let etag = get.headers().get("etag").unwrap().to_owned();

        // A HEAD probe with the GET's validator is answered 304.
        let head = app
            .handle(request("HEAD", "/doc", &[("If-None-Match", &etag)]))
            .await;
        assert_eq!(head.status(), StatusCode::NotModified);
    }
}
