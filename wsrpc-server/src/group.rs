//! Route groups
//!
//! A group registers handlers under a common prefix and wraps them in shared
//! middleware. The method name is `prefix + "/" + name`, with runs of `/`
//! collapsed, so `"user/"` and `"/info"` still give `"user/info"`.
//!
//! ```rust
//! use wsrpc_server::{from_fn, HandlerGroup};
//!
//! let group = HandlerGroup::new("user")
//!     .handler("info", from_fn(|_| async {}))
//!     .handler("rename", from_fn(|_| async {}));
//!
//! assert_eq!(group.path("info"), "user/info");
//! ```

use crate::dispatcher::Dispatcher;
use crate::handler::Handler;
use crate::middleware::Middleware;
use std::sync::Arc;
use wsrpc_core::Result;

struct Entry {
    name: String,
    handler: Box<dyn Handler>,
    middleware: Vec<Arc<dyn Middleware>>,
}

/// Handlers sharing a method prefix and middleware
pub struct HandlerGroup {
    prefix: String,
    middleware: Vec<Arc<dyn Middleware>>,
    entries: Vec<Entry>,
}

impl HandlerGroup {
    /// Empty group under `prefix`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            middleware: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Add middleware run for every handler of the group
    pub fn use_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Add a handler
    pub fn handler(self, name: impl Into<String>, handler: Box<dyn Handler>) -> Self {
        self.handler_with(name, handler, Vec::new())
    }

    /// Add a handler with its own middleware, run inside the group's
    pub fn handler_with(
        mut self,
        name: impl Into<String>,
        handler: Box<dyn Handler>,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        self.entries.push(Entry {
            name: name.into(),
            handler,
            middleware,
        });
        self
    }

    /// Full method name for `name` in this group
    pub fn path(&self, name: &str) -> String {
        join_path(&self.prefix, name)
    }

    /// Number of handlers in the group
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the group has no handlers
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register every handler; stops at the first duplicate
    pub(crate) fn register_into(self, dispatcher: &mut Dispatcher) -> Result<()> {
        for entry in self.entries {
            let path = join_path(&self.prefix, &entry.name);
            let mut middleware = self.middleware.clone();
            middleware.extend(entry.middleware);
            dispatcher.register(path, entry.handler, middleware)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HandlerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.entries.iter().map(|e| e.name.as_str()).collect();
        f.debug_struct("HandlerGroup")
            .field("prefix", &self.prefix)
            .field("middleware", &self.middleware.len())
            .field("handlers", &names)
            .finish()
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    let joined = format!("{}/{}", prefix, name);
    let mut out = String::with_capacity(joined.len());
    for c in joined.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::context::Context;
    use crate::handler::from_fn;
    use crate::middleware::Next;
    use async_trait::async_trait;
    use serde_json::json;
    use wsrpc_core::{Error, Request};

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("user", "info"), "user/info");
        assert_eq!(join_path("user/", "info"), "user/info");
        assert_eq!(join_path("user/", "/info"), "user/info");
        assert_eq!(join_path("a//b", "c"), "a/b/c");
        assert_eq!(join_path("", "info"), "/info");
    }

    struct Stamp;

    #[async_trait]
    impl Middleware for Stamp {
        async fn handle(&self, ctx: Context, next: Next<'_>) {
            ctx.set("stamped", true);
            next.run(ctx).await;
        }
    }

    #[tokio::test]
    async fn test_group_registers_prefixed_with_middleware() {
        let group = HandlerGroup::new("user/")
            .use_middleware(Arc::new(Stamp))
            .handler(
                "info",
                from_fn(|ctx| async move {
                    let stamped = ctx.get::<bool>("stamped").map(|b| *b).unwrap_or(false);
                    let _ = ctx.reply(&stamped);
                }),
            );
        assert_eq!(group.len(), 1);

        let mut dispatcher = Dispatcher::new();
        group.register_into(&mut dispatcher).unwrap();
        assert_eq!(dispatcher.methods(), vec!["user/info".to_string()]);

        let (conn, mut rx) = Connection::detached(1);
        dispatcher
            .dispatch(Context::new(Request::new("user/info", 1), conn))
            .await;
        assert_eq!(rx.recv().await.unwrap().result, Some(json!(true)));
    }

    #[test]
    fn test_group_duplicate_is_reported() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register("g/x", from_fn(|_| async {}), vec![])
            .unwrap();

        let err = HandlerGroup::new("g")
            .handler("x", from_fn(|_| async {}))
            .register_into(&mut dispatcher)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateHandler(ref m) if m == "g/x"));
    }
}
