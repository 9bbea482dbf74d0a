//! Bidirectional RPC server over WebSocket
//!
//! Clients send requests (`{"method", "params", "id"}`), the server answers
//! with responses carrying the same id, and at any time it may push messages
//! of its own (id `0`) to a connection.
//!
//! # Core Features
//!
//! - **Connection engine**: one read loop and one write loop per socket,
//!   idempotent close, per-connection user store
//! - **Dispatch**: method table with global, group and per-handler middleware
//! - **Worker pool**: optional bounded queues, one connection per worker, so
//!   requests from a connection keep their order
//! - **Admission**: live connection ceiling and `Origin` allow-list checked
//!   during the upgrade
//! - **Observability**: `tracing` spans and OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use wsrpc_server::{from_typed_fn, WsrpcServer};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct AddParams { a: i32, b: i32 }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = WsrpcServer::builder()
//!         .bind_str("127.0.0.1:8080")?
//!         .handler("add", from_typed_fn(|p: AddParams| async move { Ok(p.a + p.b) }))
//!         .build()
//!         .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Accept task**: accepts TCP connections and spawns one task per socket
//! - **Connection task**: performs the upgrade, then runs the read loop; the
//!   write loop runs in a task of its own
//! - **Handlers**: run inline on the read loop, or on the connection's worker
//!   when a pool is configured
//!
//! A handler that must not hold up later requests on its connection spawns
//! its work and replies from there; the [`Context`] it owns stays valid.

mod admission;
mod builder;
mod config;
mod conn_id;
mod connection;
mod context;
mod dispatcher;
mod group;
mod handler;
mod metrics;
mod middleware;
mod registry;
mod worker;

pub use builder::ServerBuilder;
pub use config::ServerConfig;
pub use conn_id::{ConnIdAllocator, INVALID_ID};
pub use connection::Connection;
pub use wsrpc_core::is_connection_gone;
pub use context::{Context, ContextPool};
pub use dispatcher::Dispatcher;
pub use group::HandlerGroup;
pub use handler::{from_fn, from_typed_ctx_fn, from_typed_fn, FnHandler, Handler, HandlerFuture};
pub use metrics::ServerMetrics;
pub use middleware::{LoggingMiddleware, Middleware, Next, TracingMiddleware};
pub use registry::{ConnHook, Registry};
pub use worker::WorkerPool;

use admission::Admission;
use connection::Engine;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::WebSocketStream;
use wsrpc_core::{Error, ObservabilityGuard, Result};

/// State shared by the accept loop and every connection task
pub(crate) struct Shared {
    pub(crate) engine: Engine,
    pub(crate) registry: Arc<Registry>,
    pub(crate) admission: Admission,
    pub(crate) metrics: Option<Arc<ServerMetrics>>,
    pub(crate) config: ServerConfig,
}

impl Shared {
    async fn serve_tcp(self: Arc<Self>, tcp: TcpStream) {
        let remote_addr = tcp.peer_addr().ok();

        let callback = |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            match self.admission.check(request, self.registry.len()) {
                Ok(()) => Ok(response),
                Err(rejection) => {
                    tracing::warn!(
                        remote_addr = ?remote_addr,
                        reason = rejection.reason(),
                        "Upgrade refused"
                    );
                    if let Some(m) = &self.metrics {
                        m.record_rejection(rejection.reason());
                    }
                    Err(rejection.into_response())
                }
            }
        };

        match tokio_tungstenite::accept_hdr_async(tcp, callback).await {
            Ok(ws) => self.serve_websocket(ws, remote_addr).await,
            Err(e) => tracing::debug!(remote_addr = ?remote_addr, error = %e, "Handshake failed"),
        }
    }

    async fn serve_websocket<S>(&self, mut ws: WebSocketStream<S>, remote_addr: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        match self.registry.open(remote_addr) {
            Some((conn, outbound)) => {
                connection::serve(conn, ws, outbound, self.engine.clone()).await;
            }
            None => {
                tracing::warn!(
                    remote_addr = ?remote_addr,
                    live = self.registry.len(),
                    "No connection id available, closing"
                );
                if let Some(m) = &self.metrics {
                    m.record_rejection("no_connection_id");
                }
                let _ = ws.close(None).await;
            }
        }
    }
}

/// RPC server over WebSocket
///
/// # Lifecycle
///
/// 1. **Build**: [`WsrpcServer::builder`] binds the listener
/// 2. **Run**: [`run`](WsrpcServer::run) accepts connections until the
///    listener fails
/// 3. **Close**: [`close`](WsrpcServer::close) closes every live connection;
///    dropping the server also flushes observability exporters
pub struct WsrpcServer {
    listener: TcpListener,
    shared: Arc<Shared>,
    _observability: Option<ObservabilityGuard>,
}

impl WsrpcServer {
    /// Create a new server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Accept connections and serve each on its own task
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the listener fails.
    #[tracing::instrument(skip(self), name = "server.run")]
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Accepting connections");
        loop {
            let (tcp, addr) = self
                .listener
                .accept()
                .await
                .map_err(|e| Error::Io(e.to_string()))?;
            tracing::debug!(remote_addr = %addr, "TCP connection accepted");

            let shared = Arc::clone(&self.shared);
            tokio::spawn(shared.serve_tcp(tcp));
        }
    }

    /// Upgrade one accepted TCP stream and serve it until it closes
    pub async fn serve_stream(&self, tcp: TcpStream) {
        Arc::clone(&self.shared).serve_tcp(tcp).await;
    }

    /// Serve an already-upgraded WebSocket until it closes
    ///
    /// Admission checks are the caller's business here; only the connection
    /// id allocator can still refuse the socket.
    pub async fn accept_websocket<S>(&self, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.shared.serve_websocket(ws, None).await;
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Live connection by id
    pub fn connection(&self, id: u32) -> Option<Connection> {
        self.shared.registry.get(id)
    }

    /// Ids of all live connections
    pub fn connection_ids(&self) -> Vec<u32> {
        self.shared.registry.ids()
    }

    /// The configuration the server was built with
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Close every live connection
    ///
    /// The accept loop keeps running; new connections are still admitted.
    pub fn close(&self) {
        self.shared.registry.close_all();
    }
}

impl std::fmt::Debug for WsrpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsrpcServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("registry", &self.shared.registry)
            .field("dispatcher", &self.shared.engine.dispatcher)
            .finish_non_exhaustive()
    }
}
