//! Method dispatch
//!
//! The dispatcher maps method names to handlers. Each name is registered once;
//! a second registration of the same name is refused and the first one stays
//! in place. Handler-specific middleware is composed at registration, global
//! middleware wraps it at dispatch time.
//!
//! Requests for unknown methods go to the not-found handler when one is set.
//! Otherwise calls are answered with error code
//! [`ErrorObject::NOT_FOUND`](wsrpc_core::ErrorObject::NOT_FOUND) and
//! notifications are only logged.
//!
//! ```rust
//! use wsrpc_server::{from_fn, Dispatcher};
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register("ping", from_fn(|ctx| async move { let _ = ctx.reply(&"pong"); }), vec![]).unwrap();
//!
//! let again = dispatcher.register("ping", from_fn(|_| async {}), vec![]);
//! assert!(again.is_err());
//! ```

use crate::context::Context;
use crate::handler::Handler;
use crate::metrics::ServerMetrics;
use crate::middleware::{compose, Middleware, Next};
use crate::worker::WorkerPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use wsrpc_core::{Error, ErrorObject, Result};

/// Method table plus middleware
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn Handler>>,
    middleware: Vec<Arc<dyn Middleware>>,
    not_found: Option<Arc<dyn Handler>>,
    metrics: Option<Arc<ServerMetrics>>,
}

impl Dispatcher {
    /// Empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_metrics(&mut self, metrics: Arc<ServerMetrics>) {
        self.metrics = Some(metrics);
    }

    /// Register `handler` under `name`, wrapped in `middleware`
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateHandler`] when `name` is already registered.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Box<dyn Handler>,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> Result<()> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(Error::DuplicateHandler(name));
        }
        tracing::debug!(method = %name, middleware = middleware.len(), "Handler registered");
        self.handlers
            .insert(name, compose(Arc::from(handler), middleware));
        Ok(())
    }

    /// Append a middleware applied to every dispatched request
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    /// Handler for requests naming an unregistered method
    pub fn set_not_found(&mut self, handler: Box<dyn Handler>) {
        self.not_found = Some(Arc::from(handler));
    }

    /// `true` when `method` is registered
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Run the handler for `ctx`'s method
    pub async fn dispatch(&self, ctx: Context) {
        let started = Instant::now();
        let method = ctx.method().to_string();

        let status = match self.handlers.get(&method) {
            Some(handler) => {
                Next::new(&self.middleware, handler.as_ref()).run(ctx).await;
                "ok"
            }
            None => {
                self.handle_not_found(ctx).await;
                "not_found"
            }
        };

        if let Some(m) = &self.metrics {
            m.record_request(&method, status, started.elapsed().as_secs_f64());
        }
    }

    async fn handle_not_found(&self, ctx: Context) {
        tracing::warn!(method = %ctx.method(), conn_id = ctx.conn().id(), "Method not found");
        match &self.not_found {
            Some(handler) => handler.call(ctx).await,
            None => {
                let _ = ctx.reply_error_object(ErrorObject::method_not_found(ctx.method()));
            }
        }
    }

    /// Start `size` workers with queues of `depth` requests each
    pub fn start_worker_pool(self: &Arc<Self>, size: usize, depth: usize) -> WorkerPool {
        WorkerPool::start(Arc::clone(self), size, depth)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.methods())
            .field("middleware", &self.middleware.len())
            .field("not_found", &self.not_found.is_some())
            .finish()
    }
}
