//! Middleware for cross-cutting request processing
//!
//! A middleware wraps handler execution. It receives the request's
//! [`Context`] and a [`Next`] continuation; calling `next.run(ctx)` runs the
//! rest of the chain and finally the handler. Work before that call happens on
//! the way in, work after it on the way out, and not calling it at all
//! short-circuits the request (typically after a `ctx.reply_error(..)`).
//!
//! # Ordering
//!
//! Chains run outer-to-inner: the first middleware in a list wraps all the
//! others, runs first on the way in and last on the way out. Global middleware
//! (`ServerBuilder::use_middleware`) wraps every handler's own middleware.
//!
//! Per-handler chains are composed once, when the handler is registered.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use wsrpc_server::{Context, Middleware, Next};
//!
//! struct RequireLogin;
//!
//! #[async_trait]
//! impl Middleware for RequireLogin {
//!     async fn handle(&self, ctx: Context, next: Next<'_>) {
//!         if ctx.get::<String>("user").is_err() {
//!             let _ = ctx.reply_error(401, "login required", serde_json::Value::Null);
//!             return;
//!         }
//!         next.run(ctx).await;
//!     }
//! }
//! ```

use crate::context::Context;
use crate::handler::{Handler, HandlerFuture};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Wraps handler execution
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process `ctx`, calling `next.run(ctx)` to continue the chain
    async fn handle(&self, ctx: Context, next: Next<'_>);
}

/// The remainder of a middleware chain
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(middleware: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Handler) -> Self {
        Self {
            middleware,
            endpoint,
        }
    }

    /// Run the remaining middleware, then the handler
    pub async fn run(self, ctx: Context) {
        match self.middleware.split_first() {
            Some((current, rest)) => {
                current
                    .handle(
                        ctx,
                        Next {
                            middleware: rest,
                            endpoint: self.endpoint,
                        },
                    )
                    .await
            }
            None => self.endpoint.call(ctx).await,
        }
    }
}

/// A handler pre-wrapped in its middleware
struct Chain {
    middleware: Arc<[Arc<dyn Middleware>]>,
    endpoint: Arc<dyn Handler>,
}

impl Handler for Chain {
    fn call(&self, ctx: Context) -> HandlerFuture {
        let middleware = Arc::clone(&self.middleware);
        let endpoint = Arc::clone(&self.endpoint);
        Box::pin(async move { Next::new(&middleware, endpoint.as_ref()).run(ctx).await })
    }
}

/// Wrap `endpoint` in `middleware`, outer-to-inner
pub(crate) fn compose(endpoint: Arc<dyn Handler>, middleware: Vec<Arc<dyn Middleware>>) -> Arc<dyn Handler> {
    if middleware.is_empty() {
        return endpoint;
    }
    Arc::new(Chain {
        middleware: middleware.into(),
        endpoint,
    })
}

/// Logs every request on entry and exit, with its duration
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    /// Create the middleware
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(&self, ctx: Context, next: Next<'_>) {
        let method = ctx.method().to_string();
        let id = ctx.id();
        let conn_id = ctx.conn().id();
        let started = Instant::now();

        tracing::info!(%method, id, conn_id, "Request started");
        next.run(ctx).await;
        tracing::info!(
            %method,
            id,
            conn_id,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Request finished"
        );
    }
}

/// Runs each request inside an `rpc.request` span
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMiddleware;

impl TracingMiddleware {
    /// Create the middleware
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(&self, ctx: Context, next: Next<'_>) {
        let span = tracing::info_span!(
            "rpc.request",
            rpc.method = %ctx.method(),
            rpc.id = ctx.id(),
            conn_id = ctx.conn().id(),
            otel.kind = "server",
        );
        next.run(ctx).instrument(span).await;
    }
}
