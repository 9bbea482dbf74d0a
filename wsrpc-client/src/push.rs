//! Push handlers
//!
//! The server may send messages of its own at any time; they carry id `0` and
//! are routed by method name to a handler registered with
//! [`WsrpcClient::add_handler`](crate::WsrpcClient::add_handler). A push for a
//! method with no handler is logged and dropped.
//!
//! Handlers run on the client's reader task, one at a time, in arrival order.
//! A handler that needs to make calls of its own must spawn them: the reader
//! cannot deliver their responses while it is still inside the handler.
//!
//! # Examples
//!
//! ```rust,no_run
//! use wsrpc_client::WsrpcClient;
//!
//! # async fn example(client: &WsrpcClient) -> wsrpc_core::Result<()> {
//! client.add_handler("ticker", |price: serde_json::Value| async move {
//!     println!("price update: {}", price);
//! })?;
//! # Ok(())
//! # }
//! ```

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use wsrpc_core::{Error, Result};

/// Boxed push handler
pub type PushFn = Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Registry of push handlers by method
#[derive(Clone, Default)]
pub struct PushHandlers {
    handlers: Arc<RwLock<HashMap<String, PushFn>>>,
}

impl PushHandlers {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for pushes named `method`
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateHandler`] when `method` already has a handler.
    pub fn register<F, Fut>(&self, method: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let method = method.into();
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&method) {
            return Err(Error::DuplicateHandler(method));
        }
        let handler: PushFn = Arc::new(move |value| Box::pin(handler(value)));
        handlers.insert(method, handler);
        Ok(())
    }

    /// Run the handler for `method`; `false` when there is none
    pub async fn handle(&self, method: &str, payload: Value) -> bool {
        // Clone out so the lock is not held across the handler
        let handler = self.handlers.read().get(method).cloned();
        match handler {
            Some(handler) => {
                handler(payload).await;
                true
            }
            None => false,
        }
    }

    /// `true` when `method` has a handler
    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers.read().contains_key(method)
    }

    /// Methods with a handler
    pub fn methods(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }
}

impl std::fmt::Debug for PushHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushHandlers")
            .field("methods", &self.methods())
            .finish()
    }
}
