//! Handler trait and constructors
//!
//! A handler receives an owned [`Context`] and answers through it: with
//! [`Context::reply`], [`Context::reply_error`], pushes, or not at all. The
//! dispatcher awaits the returned future, so a handler that should not hold up
//! later requests from the same connection spawns its work and returns.
//!
//! # Creating Handlers
//!
//! 1. **from_fn**: an async closure over the raw [`Context`]
//! 2. **from_typed_fn**: an async closure over decoded params; the result is
//!    replied automatically and errors become error replies
//! 3. **from_typed_ctx_fn**: like `from_typed_fn`, with the context as well
//! 4. **#[handler] macro**: generates one of the above from a plain `async fn`
//!
//! # Examples
//!
//! ```rust
//! use wsrpc_server::{from_fn, from_typed_fn};
//! use serde::Deserialize;
//!
//! let ping = from_fn(|ctx| async move {
//!     let _ = ctx.reply(&"pong");
//! });
//!
//! #[derive(Deserialize)]
//! struct AddParams { a: i32, b: i32 }
//!
//! let add = from_typed_fn(|p: AddParams| async move { Ok(p.a + p.b) });
//! ```

use crate::context::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use wsrpc_core::{Error, Result};

/// Boxed future returned by [`Handler::call`]
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A method implementation
///
/// Implemented for you by [`from_fn`] and friends; implement it directly for
/// handlers carrying their own state.
pub trait Handler: Send + Sync {
    /// Process one request
    fn call(&self, ctx: Context) -> HandlerFuture;
}

/// Adapts an async closure over [`Context`] into a [`Handler`]
pub struct FnHandler<F> {
    func: F,
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, ctx: Context) -> HandlerFuture {
        Box::pin((self.func)(ctx))
    }
}

/// Create a handler from an async closure over the raw context
pub fn from_fn<F, Fut>(func: F) -> Box<dyn Handler>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(FnHandler { func })
}

/// Create a handler from an async closure over decoded params
///
/// - params that do not decode into `P` are answered with
///   [`ErrorObject::INVALID_PARAMS`](wsrpc_core::ErrorObject::INVALID_PARAMS)
/// - `Ok(r)` is replied as the result
/// - `Err(e)` is replied as `e.to_error_object()`; return
///   `Err(Error::Rpc(..))` to choose the code yourself
///
/// Nothing is sent for notifications.
///
/// ```rust
/// use wsrpc_server::from_typed_fn;
/// use wsrpc_core::{Error, ErrorObject};
///
/// let div = from_typed_fn(|(a, b): (i64, i64)| async move {
///     if b == 0 {
///         return Err(Error::Rpc(ErrorObject::new(422, "division by zero")));
///     }
///     Ok(a / b)
/// });
/// ```
pub fn from_typed_fn<P, R, F, Fut>(func: F) -> Box<dyn Handler>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let func = Arc::new(func);
    from_typed_ctx_fn(move |_ctx: Context, params: P| {
        let func = Arc::clone(&func);
        async move { func(params).await }
    })
}

/// Like [`from_typed_fn`], also passing the context
pub fn from_typed_ctx_fn<P, R, F, Fut>(func: F) -> Box<dyn Handler>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(Context, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let func = Arc::new(func);
    from_fn(move |ctx: Context| {
        let func = Arc::clone(&func);
        async move {
            let params: P = match ctx.bind() {
                Ok(params) => params,
                Err(e) => {
                    tracing::debug!(method = %ctx.method(), error = %e, "Params rejected");
                    send_outcome::<R>(&ctx, Err(e));
                    return;
                }
            };
            let outcome = func(ctx.clone(), params).await;
            send_outcome(&ctx, outcome);
        }
    })
}

fn send_outcome<R: Serialize>(ctx: &Context, outcome: Result<R>) {
    let sent = match outcome {
        Ok(value) => ctx.reply(&value),
        Err(e) => ctx.reply_error_object(e.to_error_object()),
    };
    match sent {
        Ok(()) => {}
        Err(Error::ConnectionClosed) => {}
        Err(e) => {
            tracing::error!(method = %ctx.method(), error = %e, "Reply not sent");
            // The caller is still waiting; tell it something went wrong
            let _ = ctx.reply_error_object(e.to_error_object());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use serde::Deserialize;
    use serde_json::json;
    use wsrpc_core::{ErrorObject, Request};

    #[derive(Deserialize)]
    struct AddParams {
        a: i32,
        b: i32,
    }

    #[tokio::test]
    async fn test_typed_handler_replies_result() {
        let handler = from_typed_fn(|p: AddParams| async move { Ok(p.a + p.b) });
        let (conn, mut rx) = Connection::detached(1);

        let req = Request::new("add", 3).with_params(json!({"a": 5, "b": 3}));
        handler.call(Context::new(req, conn)).await;

        let resp = rx.recv().await.unwrap();
        assert_eq!(resp.id, 3);
        assert_eq!(resp.result, Some(json!(8)));
    }

    #[tokio::test]
    async fn test_typed_handler_invalid_params() {
        let handler = from_typed_fn(|p: AddParams| async move { Ok(p.a + p.b) });
        let (conn, mut rx) = Connection::detached(1);

        let req = Request::new("add", 4).with_params(json!({"a": "five"}));
        handler.call(Context::new(req, conn)).await;

        let err = rx.recv().await.unwrap().error.unwrap();
        assert_eq!(err.code, ErrorObject::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_typed_handler_error_mapping() {
        let handler = from_typed_fn(|code: i64| async move {
            if code == 0 {
                Err::<(), _>(Error::Internal("boom".into()))
            } else {
                Err(Error::Rpc(ErrorObject::new(code, "custom")))
            }
        });
        let (conn, mut rx) = Connection::detached(1);

        handler
            .call(Context::new(Request::new("f", 1).with_params(json!(0)), conn.clone()))
            .await;
        handler
            .call(Context::new(Request::new("f", 2).with_params(json!(451)), conn))
            .await;

        assert_eq!(rx.recv().await.unwrap().error.unwrap().code, ErrorObject::INTERNAL);
        let custom = rx.recv().await.unwrap().error.unwrap();
        assert_eq!((custom.code, custom.message.as_str()), (451, "custom"));
    }

    #[tokio::test]
    async fn test_typed_ctx_handler_sees_connection() {
        let handler = from_typed_ctx_fn(|ctx: Context, name: String| async move {
            ctx.set("name", name.clone());
            Ok(format!("conn {} is {}", ctx.conn().id(), name))
        });
        let (conn, mut rx) = Connection::detached(7);

        let req = Request::new("login", 1).with_params(json!("ada"));
        handler.call(Context::new(req, conn.clone())).await;

        assert_eq!(rx.recv().await.unwrap().result, Some(json!("conn 7 is ada")));
        assert_eq!(conn.get::<String>("name").unwrap().as_str(), "ada");
    }

    #[tokio::test]
    async fn test_typed_handler_on_notification_sends_nothing() {
        let handler = from_typed_fn(|_: ()| async move { Ok("done") });
        let (conn, mut rx) = Connection::detached(1);

        handler.call(Context::new(Request::notification("n"), conn)).await;
        assert!(rx.try_recv().is_err());
    }
}
