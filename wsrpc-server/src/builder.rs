//! Server builder
//!
//! The builder collects the bind address, configuration, handlers, middleware
//! and hooks, and `build()` binds the listener and wires everything together.
//! Registration mistakes (a method registered twice, directly or through a
//! group) do not panic; they are kept and returned by `build()`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use wsrpc_server::{from_fn, from_typed_fn, HandlerGroup, LoggingMiddleware, WsrpcServer};
//! use std::sync::Arc;
//!
//! # async fn example() -> wsrpc_core::Result<()> {
//! let server = WsrpcServer::builder()
//!     .bind_str("127.0.0.1:8080")?
//!     .worker_pool(4, 256)
//!     .max_connections(10_000)
//!     .allowed_origins(["*.example.com"])
//!     .use_middleware(Arc::new(LoggingMiddleware::new()))
//!     .handler("ping", from_fn(|ctx| async move { let _ = ctx.reply(&"pong"); }))
//!     .group("math", |g| g.handler("double", from_typed_fn(|n: i64| async move { Ok(n * 2) })))
//!     .on_close(|conn| tracing::info!(conn_id = conn.id(), "bye"))
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

use crate::admission::Admission;
use crate::conn_id::ConnIdAllocator;
use crate::connection::{Connection, Engine};
use crate::dispatcher::Dispatcher;
use crate::group::HandlerGroup;
use crate::handler::Handler;
use crate::metrics::ServerMetrics;
use crate::middleware::Middleware;
use crate::registry::{ConnHook, Registry};
use crate::{config::ServerConfig, Shared, WsrpcServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use wsrpc_core::{Error, ObservabilityConfig, Result};

/// Builder for a [`WsrpcServer`]
pub struct ServerBuilder {
    addr: Option<SocketAddr>,
    config: ServerConfig,
    dispatcher: Dispatcher,
    registration_errors: Vec<Error>,
    on_connect: Option<ConnHook>,
    on_close: Option<ConnHook>,
    observability: Option<ObservabilityConfig>,
    metrics_name: Option<String>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            addr: None,
            config: ServerConfig::default(),
            dispatcher: Dispatcher::new(),
            registration_errors: Vec::new(),
            on_connect: None,
            on_close: None,
            observability: None,
            metrics_name: None,
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Set the bind address from a string such as `"127.0.0.1:8080"`
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when `addr` is not a socket address.
    pub fn bind_str(mut self, addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("invalid address {:?}: {}", addr, e)))?;
        self.addr = Some(addr);
        Ok(self)
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Dispatch through `size` workers with queues of `depth`; `0` dispatches inline
    pub fn worker_pool(mut self, size: usize, depth: usize) -> Self {
        self.config.worker_pool_size = size;
        self.config.worker_queue_depth = depth;
        self
    }

    /// Live connection ceiling
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Host patterns allowed in the `Origin` header
    pub fn allowed_origins<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_origins = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Register a handler for `method`
    pub fn handler(self, method: impl Into<String>, handler: Box<dyn Handler>) -> Self {
        self.handler_with(method, handler, Vec::new())
    }

    /// Register a handler wrapped in its own middleware
    pub fn handler_with(
        mut self,
        method: impl Into<String>,
        handler: Box<dyn Handler>,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        if let Err(e) = self.dispatcher.register(method, handler, middleware) {
            self.registration_errors.push(e);
        }
        self
    }

    /// Register a group of handlers under `prefix`
    pub fn group<F>(mut self, prefix: impl Into<String>, configure: F) -> Self
    where
        F: FnOnce(HandlerGroup) -> HandlerGroup,
    {
        let group = configure(HandlerGroup::new(prefix));
        if let Err(e) = group.register_into(&mut self.dispatcher) {
            self.registration_errors.push(e);
        }
        self
    }

    /// Add middleware applied to every request
    pub fn use_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.dispatcher.use_middleware(middleware);
        self
    }

    /// Handler for requests naming an unregistered method
    pub fn not_found(mut self, handler: Box<dyn Handler>) -> Self {
        self.dispatcher.set_not_found(handler);
        self
    }

    /// Run `hook` for every new connection, before its first request
    pub fn on_connect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Run `hook` once when a connection closes
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(hook));
        self
    }

    /// Install logging, tracing and metrics export when the server is built
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability = Some(config);
        self
    }

    /// Record server metrics on the global meter without installing a subscriber
    pub fn with_metrics(mut self, service_name: impl Into<String>) -> Self {
        self.metrics_name = Some(service_name.into());
        self
    }

    /// Validate, bind and assemble the server
    ///
    /// # Errors
    ///
    /// - the first registration error, e.g. [`Error::DuplicateHandler`]
    /// - [`Error::Config`] for a missing address, inconsistent configuration or
    ///   a malformed origin pattern
    /// - [`Error::Io`] when the address cannot be bound
    pub async fn build(mut self) -> Result<WsrpcServer> {
        if let Some(e) = self.registration_errors.into_iter().next() {
            return Err(e);
        }
        let addr = self
            .addr
            .ok_or_else(|| Error::Config("no bind address specified".to_string()))?;
        self.config.validate()?;
        let admission = Admission::new(&self.config.allowed_origins, self.config.max_connections)?;

        let observability = match &self.observability {
            Some(config) => Some(wsrpc_core::init_observability(config)?),
            None => None,
        };
        let metrics_name = self
            .metrics_name
            .or_else(|| self.observability.as_ref().map(|c| c.service_name.clone()));
        let metrics = metrics_name.map(|name| Arc::new(ServerMetrics::new(name)));

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Io(e.to_string()))?;

        if let Some(m) = &metrics {
            self.dispatcher.set_metrics(Arc::clone(m));
        }
        let dispatcher = Arc::new(self.dispatcher);
        let workers = (self.config.worker_pool_size > 0).then(|| {
            dispatcher.start_worker_pool(
                self.config.worker_pool_size,
                self.config.worker_queue_depth,
            )
        });

        let registry = Arc::new(Registry::new(
            ConnIdAllocator::new(self.config.max_connection_id, self.config.max_connections),
            self.on_connect,
            self.on_close,
            metrics.clone(),
            self.config.outbound_queue_depth,
        ));

        tracing::info!(
            addr = %listener.local_addr().unwrap_or(addr),
            methods = dispatcher.methods().len(),
            workers = self.config.worker_pool_size,
            max_connections = self.config.max_connections,
            "Server listening"
        );

        Ok(WsrpcServer {
            listener,
            shared: Arc::new(Shared {
                engine: Engine {
                    dispatcher,
                    workers,
                    metrics: metrics.clone(),
                },
                registry,
                admission,
                metrics,
                config: self.config,
            }),
            _observability: observability,
        })
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("addr", &self.addr)
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
