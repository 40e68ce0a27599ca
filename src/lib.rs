//! # revalid
//!
//! Vary-aware HTTP conditional caching for clients and servers.
//!
//! The crate is a pair of interceptors around a shared protocol core:
//!
//! - [`client::CachingClient`] sits in front of an upstream transport,
//!   serves fresh hits from a response store, and revalidates stale entries
//!   with `If-None-Match`/`If-Modified-Since`, merging `304` answers back
//!   onto the stored body.
//! - [`validate::ValidationStage`] is a server middleware that compares
//!   request preconditions against the resource's current validator and
//!   answers `304 Not Modified` / `412 Precondition Failed` without
//!   invoking the resource handler.
//!
//! The core they share: Vary-aware cache keys ([`key`]), the entity-tag +
//! last-modified validator model and its canonical codec ([`validator`]),
//! Cache-Control interpretation ([`freshness`]), the diagnostic trace
//! header ([`trace`]), and two narrow store traits with in-memory adapters
//! ([`store`]). External storage backends plug in behind the same traits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use revalid::policy::RouteCachePolicy;
//! use revalid::server::{App, Server};
//! use revalid::store::MemoryValidatorStore;
//! use revalid::validate::ValidationStage;
//! use revalid::{Response, Router, StatusCode};
//! use revalid::context::Context;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), revalid::ServerError> {
//!     let mut router = Router::new();
//!     router.get_cached("/api/cars/:id", RouteCachePolicy::public(60), |ctx: Context| async move {
//!         let id = ctx.params().get("id").unwrap_or("?").to_owned();
//!         Response::new(StatusCode::Ok).body(format!("car {id}"))
//!     });
//!
//!     let stage = ValidationStage::new(Arc::new(MemoryValidatorStore::new()));
//!     let app = App::new(router).layer(Arc::new(stage));
//!
//!     Server::bind("127.0.0.1:8080").await?.serve(app).await
//! }
//! ```

// ── HTTP primitives and hosting ───────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

// ── The conditional-caching protocol core ─────────────────────────────────────
pub mod client;
pub mod freshness;
pub mod key;
pub mod policy;
pub mod store;
pub mod trace;
pub mod validate;
pub mod validator;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{App, Server, ServerError};
