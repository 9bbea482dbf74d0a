//! Per-request context and its per-connection pool
//!
//! A [`Context`] binds one inbound [`Request`] to the [`Connection`] it arrived
//! on and is the only thing a handler receives. Replies, pushes and the
//! connection's user store are all reached through it.
//!
//! # Pooling and handoff
//!
//! Each connection's read loop owns a [`ContextPool`] of scratch contexts. For
//! every decoded request it acquires a scratch context, resets it with the
//! request, and hands a [`detach`](Context::detach)ed copy to the dispatcher
//! (inline or through a worker queue). The scratch goes back to the pool and is
//! reused for the next request; the detached copy is owned by the handler and
//! never observes later requests.

use crate::connection::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use wsrpc_core::{codec, Error, ErrorObject, Request, Response, Result};

/// Request plus the connection it arrived on
#[derive(Clone)]
pub struct Context {
    request: Request,
    conn: Connection,
}

impl Context {
    /// Bind `request` to `conn`
    pub fn new(request: Request, conn: Connection) -> Self {
        Self { request, conn }
    }

    /// The inbound request
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Method name of the inbound request
    pub fn method(&self) -> &str {
        &self.request.method
    }

    /// Id of the inbound request, `0` for notifications
    pub fn id(&self) -> i64 {
        self.request.id
    }

    /// Raw params payload
    pub fn params(&self) -> Option<&Value> {
        self.request.params.as_ref()
    }

    /// `true` when the caller expects no reply
    pub fn is_notification(&self) -> bool {
        self.request.is_notification()
    }

    /// The connection the request arrived on
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Decode the params into `T`; absent params decode from `null`
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParams`] when the payload does not fit `T`.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T> {
        codec::decode_as(self.request.params_or_null()).map_err(|e| match e {
            Error::Decode(msg) => Error::InvalidParams(msg),
            other => other,
        })
    }

    /// Reply with a result
    ///
    /// Replies to notifications are not sent.
    ///
    /// # Errors
    ///
    /// [`Error::Encoding`] when `data` cannot be encoded, and
    /// [`Error::ConnectionClosed`] when the connection is closing.
    pub fn reply<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        if self.is_notification() {
            tracing::trace!(method = %self.request.method, "Reply to notification suppressed");
            return Ok(());
        }
        let mut response = Response::reply(self.request.method.clone(), self.request.id, Value::Null);
        response.set_result(data)?;
        self.deliver(response)
    }

    /// Reply with an error object built from `code`, `msg` and `data`
    pub fn reply_error(&self, code: i64, msg: impl Into<String>, data: Value) -> Result<()> {
        self.reply_error_object(ErrorObject::with_data(code, msg, data))
    }

    /// Reply with a prepared error object
    ///
    /// Like [`reply`](Self::reply), nothing is sent for notifications.
    pub fn reply_error_object(&self, error: ErrorObject) -> Result<()> {
        if self.is_notification() {
            tracing::trace!(
                method = %self.request.method,
                code = error.code,
                "Error reply to notification suppressed"
            );
            return Ok(());
        }
        let response = Response::failure(self.request.method.clone(), self.request.id, error);
        self.deliver(response)
    }

    /// Push `data` to the client under this request's method (id `0`)
    pub fn notify<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        self.conn.push(&self.request.method, data)
    }

    /// Read from the connection's user store
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        self.conn.get(key)
    }

    /// Write to the connection's user store
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.conn.set(key, value)
    }

    /// Owned copy for a handoff across tasks
    pub fn detach(&self) -> Context {
        self.clone()
    }

    fn deliver(&self, response: Response) -> Result<()> {
        if self.conn.send_message(response) {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    fn reset(&mut self, request: Request) {
        self.request = request;
    }

    fn clear(&mut self) {
        self.request.method.clear();
        self.request.params = None;
        self.request.id = 0;
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("conn_id", &self.conn.id())
            .field("method", &self.request.method)
            .field("id", &self.request.id)
            .finish()
    }
}

/// Free list of scratch contexts owned by one connection's read loop
pub struct ContextPool {
    conn: Connection,
    free: Vec<Context>,
    capacity: usize,
}

impl ContextPool {
    /// Pool for `conn` retaining at most `capacity` idle contexts
    pub fn new(conn: Connection, capacity: usize) -> Self {
        Self {
            conn,
            free: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Take a scratch context reset with `request`
    pub fn acquire(&mut self, request: Request) -> Context {
        match self.free.pop() {
            Some(mut ctx) => {
                ctx.reset(request);
                ctx
            }
            None => Context::new(request, self.conn.clone()),
        }
    }

    /// Return a scratch context for reuse
    pub fn release(&mut self, mut ctx: Context) {
        if self.free.len() < self.capacity {
            ctx.clear();
            self.free.push(ctx);
        }
    }

    /// Idle contexts currently pooled
    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_detached_copy_survives_scratch_reuse() {
        let (conn, _rx) = Connection::detached(1);
        let mut pool = ContextPool::new(conn, 4);

        let scratch = pool.acquire(Request::new("first", 1).with_params(json!({"n": 1})));
        let handed_off = scratch.detach();
        pool.release(scratch);
        assert_eq!(pool.idle(), 1);

        let reused = pool.acquire(Request::new("second", 2).with_params(json!({"n": 2})));
        assert_eq!(pool.idle(), 0);
        assert_eq!(reused.method(), "second");

        assert_eq!(handed_off.method(), "first");
        assert_eq!(handed_off.id(), 1);
        assert_eq!(handed_off.params(), Some(&json!({"n": 1})));
    }

    #[test]
    fn test_pool_capacity_bounds_idle_contexts() {
        let (conn, _rx) = Connection::detached(1);
        let mut pool = ContextPool::new(conn, 1);

        let a = pool.acquire(Request::new("a", 1));
        let b = pool.acquire(Request::new("b", 2));
        pool.release(a);
        pool.release(b);

        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_bind_params() {
        #[derive(Deserialize)]
        struct Add {
            a: i32,
            b: i32,
        }

        let (conn, _rx) = Connection::detached(1);
        let ctx = Context::new(Request::new("add", 1).with_params(json!({"a": 2, "b": 3})), conn.clone());
        let add: Add = ctx.bind().unwrap();
        assert_eq!(add.a + add.b, 5);

        let bad = Context::new(Request::new("add", 1).with_params(json!([1])), conn.clone());
        assert!(matches!(bad.bind::<Add>(), Err(Error::InvalidParams(_))));

        let absent = Context::new(Request::new("opt", 1), conn);
        let none: Option<i32> = absent.bind().unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn test_reply_and_reply_error() {
        let (conn, mut rx) = Connection::detached(1);
        let ctx = Context::new(Request::new("sum", 7), conn);

        ctx.reply(&json!(42)).unwrap();
        let resp = rx.recv().await.unwrap();
        assert_eq!((resp.method.as_str(), resp.id), ("sum", 7));
        assert_eq!(resp.result, Some(json!(42)));

        ctx.reply_error(409, "conflict", json!({"v": 2})).unwrap();
        let resp = rx.recv().await.unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, 409);
        assert_eq!(err.data, json!({"v": 2}));
        assert!(resp.result.is_none());
    }

    #[tokio::test]
    async fn test_reply_to_notification_is_suppressed() {
        let (conn, mut rx) = Connection::detached(1);
        let ctx = Context::new(Request::notification("log"), conn);

        ctx.reply(&"ignored").unwrap();
        ctx.reply_error(500, "ignored", Value::Null).unwrap();
        ctx.notify(&"pushed").unwrap();

        let resp = rx.recv().await.unwrap();
        assert!(resp.is_push());
        assert_eq!(resp.method, "log");
        assert_eq!(resp.result, Some(json!("pushed")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reply_after_close_reports_closed() {
        let (conn, _rx) = Connection::detached(1);
        let ctx = Context::new(Request::new("m", 1), conn.clone());
        conn.close();

        assert!(matches!(ctx.reply(&1), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_store_through_context() {
        let (conn, _rx) = Connection::detached(1);
        let ctx = Context::new(Request::new("m", 1), conn.clone());

        ctx.set("user", String::from("ada"));
        let user: Arc<String> = ctx.get("user").unwrap();
        assert_eq!(user.as_str(), "ada");
        assert!(matches!(ctx.get::<String>("missing"), Err(Error::KeyNotFound(_))));
    }
}
