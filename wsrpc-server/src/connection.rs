//! WebSocket connection engine
//!
//! Each upgraded socket is driven by two loops:
//!
//! - **Read loop** (runs on the connection's own task): decodes one request per
//!   frame, draws a scratch [`Context`](crate::Context) from the connection's
//!   pool and hands a detached copy to the dispatcher, inline or via the worker
//!   queue for this connection. Malformed frames are logged and skipped; an
//!   error that means the peer is gone ends the loop.
//! - **Write loop** (spawned task): drains the bounded outbound queue, encoding
//!   one response per text frame. Once close begins it gets [`CLOSE_GRACE`] to
//!   flush what is queued and send a close frame; a peer that stops reading
//!   loses the rest and the socket is dropped.
//!
//! # Closing
//!
//! [`Connection::close`] is idempotent and may race with the read loop's own
//! teardown. The closing flag, checked and set under the state mutex, decides
//! the single winner, which then signals the read loop, runs the close hook,
//! drops the outbound sender (the write loop drains what is queued and closes
//! the socket), removes the connection from the registry and releases its id.
//! [`Connection::send_message`] checks the same flag under the same mutex, so
//! nothing is queued after close begins. A send that finds the outbound queue
//! full closes the connection: the peer is not keeping up.

use crate::context::ContextPool;
use crate::dispatcher::Dispatcher;
use crate::metrics::ServerMetrics;
use crate::registry::Registry;
use crate::worker::WorkerPool;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::Instrument;
use wsrpc_core::{codec, is_connection_gone, Error, Request, Response, Result};

/// Scratch contexts kept per connection
const CONTEXT_POOL_CAPACITY: usize = 16;

/// Time the write loop gets, once close begins, to flush the queue and send
/// the close frame
pub(crate) const CLOSE_GRACE: Duration = Duration::from_secs(1);

type Store = HashMap<String, Arc<dyn Any + Send + Sync>>;

struct State {
    closing: bool,
    outbound: Option<mpsc::Sender<Response>>,
}

struct Inner {
    id: u32,
    remote_addr: Option<SocketAddr>,
    state: Mutex<State>,
    done: watch::Sender<bool>,
    store: Mutex<Option<Store>>,
    registry: Weak<Registry>,
    metrics: Option<Arc<ServerMetrics>>,
}

/// Handle to one live client connection
///
/// Cheap to clone; every clone refers to the same connection. The registry
/// owns the canonical handle, and the connection refers back to the registry
/// only weakly.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub(crate) fn new(
        id: u32,
        remote_addr: Option<SocketAddr>,
        registry: Weak<Registry>,
        metrics: Option<Arc<ServerMetrics>>,
        outbound_depth: usize,
    ) -> (Self, mpsc::Receiver<Response>) {
        let (tx, rx) = mpsc::channel(outbound_depth.max(1));
        let (done, _) = watch::channel(false);
        let conn = Self {
            inner: Arc::new(Inner {
                id,
                remote_addr,
                state: Mutex::new(State {
                    closing: false,
                    outbound: Some(tx),
                }),
                done,
                store: Mutex::new(None),
                registry,
                metrics,
            }),
        };
        (conn, rx)
    }

    /// Connection outside any registry
    #[cfg(test)]
    pub(crate) fn detached(id: u32) -> (Self, mpsc::Receiver<Response>) {
        Self::detached_with_depth(id, crate::config::DEFAULT_OUTBOUND_QUEUE_DEPTH)
    }

    #[cfg(test)]
    pub(crate) fn detached_with_depth(id: u32, depth: usize) -> (Self, mpsc::Receiver<Response>) {
        Self::new(id, None, Weak::new(), None, depth)
    }

    /// Connection id, unique among live connections
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    /// Peer address, when known
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// `true` once [`close`](Self::close) has begun
    pub fn is_closing(&self) -> bool {
        self.inner.state.lock().closing
    }

    /// Queue a response for the write loop
    ///
    /// Never blocks. Returns `false` (and logs) when the response was dropped,
    /// either because the connection is closing or because the outbound queue
    /// is full. A full queue also closes the connection.
    pub fn send_message(&self, response: Response) -> bool {
        let state = self.inner.state.lock();
        let outcome = match (&state.outbound, state.closing) {
            (Some(tx), false) => tx.try_send(response),
            _ => Err(TrySendError::Closed(response)),
        };
        drop(state);

        let full = match outcome {
            Ok(()) => return true,
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        };

        if let Some(m) = &self.inner.metrics {
            m.record_dropped();
        }
        if full {
            tracing::warn!(conn_id = self.inner.id, "Outbound queue full, closing slow connection");
            self.close();
        } else {
            tracing::debug!(conn_id = self.inner.id, "Connection closing, message dropped");
        }
        false
    }

    /// Push `data` to the client under `method` (id `0`)
    ///
    /// # Errors
    ///
    /// [`Error::Encoding`] when `data` cannot be encoded and
    /// [`Error::ConnectionClosed`] when the connection is closing.
    pub fn push<T: Serialize + ?Sized>(&self, method: impl Into<String>, data: &T) -> Result<()> {
        let mut response = Response::push(method, Value::Null);
        response.set_result(data)?;
        if self.send_message(response) {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    /// Close the connection; later calls are no-ops
    pub fn close(&self) {
        let outbound = {
            let mut state = self.inner.state.lock();
            if state.closing {
                return;
            }
            state.closing = true;
            state.outbound.take()
        };

        self.inner.done.send_replace(true);

        if let Some(registry) = self.inner.registry.upgrade() {
            registry.run_close_hook(self);
        }

        // The write loop drains what is queued, then closes the socket
        drop(outbound);

        if let Some(registry) = self.inner.registry.upgrade() {
            registry.forget(self.inner.id);
        }

        tracing::debug!(conn_id = self.inner.id, "Connection closed");
    }

    /// Read a value from the user store
    ///
    /// # Errors
    ///
    /// [`Error::KeyNotFound`] when nothing is stored under `key` or the stored
    /// value is not a `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        let value = self
            .inner
            .store
            .lock()
            .as_ref()
            .and_then(|store| store.get(key).cloned())
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;

        value
            .downcast::<T>()
            .map_err(|_| Error::KeyNotFound(format!("{key} (stored value has another type)")))
    }

    /// Store a value under `key`, replacing any previous one
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.inner
            .store
            .lock()
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), Arc::new(value));
    }

    fn done_signal(&self) -> watch::Receiver<bool> {
        self.inner.done.subscribe()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// What a connection hands decoded requests to
#[derive(Clone)]
pub(crate) struct Engine {
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) workers: Option<WorkerPool>,
    pub(crate) metrics: Option<Arc<ServerMetrics>>,
}

/// Drive `conn` over `ws` until either side closes
pub(crate) async fn serve<S>(
    conn: Connection,
    ws: WebSocketStream<S>,
    outbound: mpsc::Receiver<Response>,
    engine: Engine,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let span = tracing::info_span!("connection", conn_id = conn.id());
    async move {
        tracing::info!(remote_addr = ?conn.remote_addr(), "Connection started");

        let (sink, stream) = ws.split();
        let writer = tokio::spawn(
            write_loop(conn.clone(), sink, outbound).in_current_span(),
        );

        read_loop(&conn, stream, &engine).await;
        conn.close();

        if let Err(e) = writer.await {
            tracing::error!(error = %e, "Write loop task failed");
        }
        tracing::info!("Connection finished");
    }
    .instrument(span)
    .await
}

async fn read_loop<S>(conn: &Connection, mut stream: SplitStream<WebSocketStream<S>>, engine: &Engine)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut done = conn.done_signal();
    let mut pool = ContextPool::new(conn.clone(), CONTEXT_POOL_CAPACITY);

    loop {
        let closed = *done.borrow();
        if closed {
            break;
        }

        let frame = tokio::select! {
            _ = done.changed() => break,
            frame = stream.next() => frame,
        };

        let decoded = match frame {
            None => {
                tracing::debug!("Stream ended");
                break;
            }
            Some(Ok(Message::Text(text))) => codec::decode_request(&text),
            Some(Ok(Message::Binary(bytes))) => codec::decode_request_slice(&bytes),
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Connection closed by client");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) if is_connection_gone(&e) => {
                tracing::debug!(error = %e, "Connection gone");
                break;
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Read error, frame skipped");
                continue;
            }
        };

        let request: Request = match decoded {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed frame skipped");
                if let Some(m) = &engine.metrics {
                    m.record_decode_error();
                }
                continue;
            }
        };

        tracing::debug!(method = %request.method, id = request.id, "Request received");

        let scratch = pool.acquire(request);
        match &engine.workers {
            Some(workers) => {
                let owned = scratch.detach();
                pool.release(scratch);
                if let Err(e) = workers.submit(owned).await {
                    tracing::error!(error = %e, "Worker queue unavailable");
                    break;
                }
            }
            None => {
                engine.dispatcher.dispatch(scratch.detach()).await;
                pool.release(scratch);
            }
        }
    }
}

async fn write_loop<S>(
    conn: Connection,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<Response>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let done = conn.done_signal();
    let flush = async {
        drain(&conn, &mut sink, &mut outbound).await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            tracing::trace!(error = %e, "Close frame not sent");
        }
        if let Err(e) = sink.close().await {
            tracing::trace!(error = %e, "Sink close failed");
        }
    };
    tokio::pin!(flush);

    tokio::select! {
        _ = &mut flush => {}
        _ = closed(done) => {
            if tokio::time::timeout(CLOSE_GRACE, &mut flush).await.is_err() {
                tracing::warn!("Peer not reading, socket dropped without flushing");
            }
        }
    }
}

/// Write queued responses until the queue is closed or a write fails
async fn drain<S>(
    conn: &Connection,
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    outbound: &mut mpsc::Receiver<Response>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(response) = outbound.recv().await {
        let text = match codec::encode_response(&response) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, method = %response.method, id = response.id, "Response not encodable, dropped");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            tracing::warn!(error = %e, "Write failed");
            conn.close();
            return;
        }
    }
}

/// Resolves once close has begun
async fn closed(mut done: watch::Receiver<bool>) {
    loop {
        let closing = *done.borrow_and_update();
        if closing || done.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::from_fn;
    use serde_json::json;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn socket_pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (server, client)
    }

    fn echo_engine() -> Engine {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(
                "echo",
                from_fn(|ctx| async move {
                    let _ = ctx.reply(&ctx.request().params_or_null());
                }),
                Vec::new(),
            )
            .unwrap();
        Engine {
            dispatcher: Arc::new(dispatcher),
            workers: None,
            metrics: None,
        }
    }

    async fn next_response(client: &mut WebSocketStream<tokio::io::DuplexStream>) -> Response {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return codec::decode_response(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("Expected a text frame, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_send_message_after_close_is_dropped() {
        let (conn, mut rx) = Connection::detached(5);

        assert!(conn.send_message(Response::push("a", json!(1))));
        conn.close();
        assert!(!conn.send_message(Response::push("b", json!(2))));

        assert_eq!(rx.recv().await.unwrap().method, "a");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_outbound_queue_closes_connection() {
        let (conn, mut rx) = Connection::detached_with_depth(4, 2);

        assert!(conn.send_message(Response::push("a", json!(1))));
        assert!(conn.send_message(Response::push("b", json!(2))));
        assert!(!conn.send_message(Response::push("c", json!(3))));
        assert!(conn.is_closing());

        // What was queued before the overflow is still delivered
        assert_eq!(rx.recv().await.unwrap().method, "a");
        assert_eq!(rx.recv().await.unwrap().method, "b");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_with_stalled_peer_releases_socket() {
        let (a, peer) = tokio::io::duplex(1024);
        let server_ws = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let (conn, rx) = Connection::detached(3);
        let task = tokio::spawn(serve(conn.clone(), server_ws, rx, echo_engine()));

        // The peer never reads, so the write loop blocks on the first frames
        let blob = "x".repeat(1024);
        for _ in 0..200 {
            conn.push("blob", &blob).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        conn.close();
        let finished = tokio::time::timeout(CLOSE_GRACE + Duration::from_secs(2), task).await;
        assert!(finished.is_ok(), "serve still running after close");
        drop(peer);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (conn, _rx) = Connection::detached(5);
        conn.close();
        conn.close();
        assert!(conn.is_closing());
    }

    #[test]
    fn test_store_type_mismatch() {
        let (conn, _rx) = Connection::detached(1);
        conn.set("n", 7u32);

        assert_eq!(*conn.get::<u32>("n").unwrap(), 7);
        assert!(matches!(conn.get::<String>("n"), Err(Error::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_serve_echoes_and_skips_malformed_frames() {
        let (server_ws, mut client) = socket_pair().await;
        let (conn, rx) = Connection::detached(1);
        let task = tokio::spawn(serve(conn.clone(), server_ws, rx, echo_engine()));

        client.send(Message::Text("{not json".into())).await.unwrap();
        client
            .send(Message::Text(r#"{"method":"echo","params":{"x":1},"id":9}"#.into()))
            .await
            .unwrap();

        let resp = next_response(&mut client).await;
        assert_eq!(resp.id, 9);
        assert_eq!(resp.result, Some(json!({"x": 1})));

        client
            .send(Message::Binary(br#"{"method":"echo","id":10}"#.to_vec()))
            .await
            .unwrap();
        let resp = next_response(&mut client).await;
        assert_eq!(resp.id, 10);
        assert_eq!(resp.result, Some(Value::Null));

        client.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(conn.is_closing());
    }

    #[tokio::test]
    async fn test_server_side_close_ends_both_loops() {
        let (server_ws, mut client) = socket_pair().await;
        let (conn, rx) = Connection::detached(2);
        let task = tokio::spawn(serve(conn.clone(), server_ws, rx, echo_engine()));

        conn.push("hello", &json!("world")).unwrap();
        let push = next_response(&mut client).await;
        assert!(push.is_push());
        assert_eq!(push.method, "hello");

        conn.close();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        // The client observes the close frame
        let mut saw_close = false;
        while let Some(frame) = client.next().await {
            if matches!(frame, Ok(Message::Close(_))) {
                saw_close = true;
            }
            if frame.is_err() {
                break;
            }
        }
        assert!(saw_close);
    }
}
