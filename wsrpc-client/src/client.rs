//! RPC client over WebSocket
//!
//! [`WsrpcClient`] owns one WebSocket connection. Calls are correlated with
//! their responses by sequence id; a single reader task routes every inbound
//! frame either to the waiting call or, for id `0`, to a push handler.
//!
//! # Client Lifecycle
//!
//! 1. **Connect**: [`WsrpcClient::connect`] or [`ClientBuilder`](crate::ClientBuilder)
//! 2. **Use**: [`call`](WsrpcClient::call), [`notify`](WsrpcClient::notify),
//!    [`add_handler`](WsrpcClient::add_handler)
//! 3. **Close**: [`close`](WsrpcClient::close), or the server goes away; either
//!    way pending calls fail with `ConnectionClosed` and later calls fail at
//!    once
//!
//! # Cloning
//!
//! `WsrpcClient` is cheap to clone; all clones share the connection, so calls
//! can be made from many tasks at once.

use crate::config::{CallOptions, ClientConfig};
use crate::metrics::ClientMetrics;
use crate::pending::PendingCalls;
use crate::push::PushHandlers;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use wsrpc_core::{codec, is_connection_gone, Error, ObservabilityGuard, Request, Response, Result};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

struct Inner {
    sink: tokio::sync::Mutex<WsSink>,
    pending: PendingCalls,
    pushes: PushHandlers,
    config: ClientConfig,
    metrics: Option<Arc<ClientMetrics>>,
    closing: AtomicBool,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    _observability: Option<ObservabilityGuard>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

/// RPC client over one WebSocket connection
#[derive(Clone)]
pub struct WsrpcClient {
    inner: Arc<Inner>,
}

impl WsrpcClient {
    /// Connect to `url` with default configuration
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] when the connection or upgrade fails.
    pub async fn connect(url: &str) -> Result<Self> {
        crate::ClientBuilder::new(url).connect().await
    }

    /// Wrap an established socket and start its reader task
    pub(crate) fn start(
        ws: WsStream,
        config: ClientConfig,
        metrics: Option<Arc<ClientMetrics>>,
        observability: Option<ObservabilityGuard>,
    ) -> Self {
        let (sink, stream) = ws.split();
        let pending = PendingCalls::new();
        let pushes = PushHandlers::new();

        let reader = tokio::spawn(read_loop(
            stream,
            pending.clone(),
            pushes.clone(),
            metrics.clone(),
        ));
        if let Some(m) = &metrics {
            m.record_connected(true);
        }

        Self {
            inner: Arc::new(Inner {
                sink: tokio::sync::Mutex::new(sink),
                pending,
                pushes,
                config,
                metrics,
                closing: AtomicBool::new(false),
                reader: parking_lot::Mutex::new(Some(reader)),
                _observability: observability,
            }),
        }
    }

    /// Call `method` and wait for its result, with the default deadline
    ///
    /// A response without a result decodes as if the result were `null`.
    ///
    /// # Errors
    ///
    /// - [`Error::Rpc`] carrying the server's error object
    /// - [`Error::Timeout`] when no response arrives in time
    /// - [`Error::ConnectionClosed`] when the connection is or becomes closed
    /// - [`Error::Decode`] when the result does not fit `R`
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.call_with(method, params, CallOptions::default()).await
    }

    /// Like [`call`](Self::call), with per-call options
    #[tracing::instrument(skip_all, fields(method = %method))]
    pub async fn call_with<P, R>(&self, method: &str, params: &P, options: CallOptions) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let started = Instant::now();
        let timeout = options.timeout.unwrap_or(self.inner.config.default_timeout);

        let (id, rx) = self.inner.pending.register(method)?;
        let sent = Self::encode_call(method, id, params);
        let sent = match sent {
            Ok(text) => self.send_text(text).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            self.inner.pending.evict(id);
            return Err(e);
        }
        tracing::debug!(id, "Call sent, waiting for response");

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without an answer: the table was torn down
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.inner.pending.evict(id);
                if let Some(m) = &self.inner.metrics {
                    m.record_timeout(method);
                }
                tracing::warn!(id, timeout_ms = timeout.as_millis() as u64, "Call timed out");
                Err(Error::timeout(method, timeout))
            }
        };

        let result = outcome.and_then(|response| match response.error {
            Some(error) => Err(Error::Rpc(error)),
            None => codec::decode_as(response.result.unwrap_or(Value::Null)),
        });

        if let Some(m) = &self.inner.metrics {
            let status = match &result {
                Ok(_) => "ok",
                Err(Error::Rpc(_)) => "error",
                Err(Error::Timeout { .. }) => "timeout",
                Err(_) => "failed",
            };
            m.record_call(method, status, started.elapsed().as_secs_f64());
        }
        result
    }

    fn encode_call<P: Serialize + ?Sized>(method: &str, id: i64, params: &P) -> Result<String> {
        let mut request = Request::new(method, id);
        request.set_params(params)?;
        codec::encode_request(&request)
    }

    /// Send a notification; nothing is registered and no reply is expected
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] after close, [`Error::Transport`] when the
    /// write fails.
    pub async fn notify<P>(&self, method: &str, params: &P) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let mut request = Request::notification(method);
        request.set_params(params)?;
        let text = codec::encode_request(&request)?;
        self.send_text(text).await
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut sink = self.inner.sink.lock().await;
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        sink.send(Message::Text(text))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    /// Register a handler for server pushes named `method`
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateHandler`] when `method` already has a handler.
    pub fn add_handler<F, Fut>(&self, method: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.pushes.register(method, handler)
    }

    /// Close the connection; later calls are no-ops
    ///
    /// Pending calls fail with [`Error::ConnectionClosed`].
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        let failed = self.inner.pending.close(Error::ConnectionClosed);
        {
            let mut sink = self.inner.sink.lock().await;
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        if let Some(reader) = self.inner.reader.lock().take() {
            reader.abort();
        }
        if let Some(m) = &self.inner.metrics {
            m.record_connected(false);
        }
        tracing::info!(failed_calls = failed, "Client closed");
    }

    /// `true` once the connection is closed, by either side
    pub fn is_closed(&self) -> bool {
        self.inner.pending.is_closed()
    }

    /// Number of calls waiting for a response
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// The configuration the client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for WsrpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsrpcClient")
            .field("pending", &self.inner.pending)
            .field("pushes", &self.inner.pushes)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    pending: PendingCalls,
    pushes: PushHandlers,
    metrics: Option<Arc<ClientMetrics>>,
) {
    while let Some(frame) = stream.next().await {
        let decoded = match frame {
            Ok(Message::Text(text)) => codec::decode_response(&text),
            Ok(Message::Binary(bytes)) => codec::decode_response_slice(&bytes),
            Ok(Message::Close(frame)) => {
                tracing::info!(frame = ?frame, "Connection closed by server");
                break;
            }
            Ok(_) => continue,
            Err(e) if is_connection_gone(&e) => {
                tracing::warn!(error = %e, "WebSocket read failed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Read error, frame skipped");
                continue;
            }
        };

        match decoded {
            Ok(response) => route(response, &pending, &pushes, metrics.as_deref()).await,
            Err(e) => tracing::warn!(error = %e, "Malformed message skipped"),
        }
    }

    let failed = pending.close(Error::ConnectionClosed);
    if let Some(m) = &metrics {
        m.record_connected(false);
    }
    tracing::debug!(failed_calls = failed, "Reader stopped");
}

async fn route(
    response: Response,
    pending: &PendingCalls,
    pushes: &PushHandlers,
    metrics: Option<&ClientMetrics>,
) {
    if response.is_push() {
        if let Some(m) = metrics {
            m.record_push(&response.method);
        }
        if let Some(error) = &response.error {
            tracing::warn!(method = %response.method, %error, "Push carried an error");
            return;
        }
        let method = response.method;
        let payload = response.result.unwrap_or(Value::Null);
        if !pushes.handle(&method, payload).await {
            tracing::debug!(%method, "No handler for push, dropped");
        }
        return;
    }

    let id = response.id;
    let method = response.method.clone();
    if !pending.complete(response) {
        if let Some(m) = metrics {
            m.record_unmatched();
        }
        tracing::warn!(id, %method, "Response matches no pending call, dropped");
    }
}
