//! Live connection registry
//!
//! The registry owns the canonical handle of every live [`Connection`], keyed
//! by connection id, together with the id allocator and the connection
//! lifecycle hooks. Connections refer back to it through a `Weak` pointer, so
//! dropping the server drops the registry even while handles are still held by
//! handlers.

use crate::conn_id::{ConnIdAllocator, INVALID_ID};
use crate::connection::Connection;
use crate::metrics::ServerMetrics;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use wsrpc_core::Response;

/// Callback run when a connection starts or closes
pub type ConnHook = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Set of live connections plus the id allocator
pub struct Registry {
    connections: RwLock<HashMap<u32, Connection>>,
    ids: ConnIdAllocator,
    on_connect: Option<ConnHook>,
    on_close: Option<ConnHook>,
    metrics: Option<Arc<ServerMetrics>>,
    outbound_depth: usize,
}

impl Registry {
    pub(crate) fn new(
        ids: ConnIdAllocator,
        on_connect: Option<ConnHook>,
        on_close: Option<ConnHook>,
        metrics: Option<Arc<ServerMetrics>>,
        outbound_depth: usize,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            ids,
            on_connect,
            on_close,
            metrics,
            outbound_depth,
        }
    }

    /// Allocate an id and register a new connection
    ///
    /// Returns `None` when the allocator is exhausted or at its live ceiling.
    pub(crate) fn open(
        self: &Arc<Self>,
        remote_addr: Option<SocketAddr>,
    ) -> Option<(Connection, mpsc::Receiver<Response>)> {
        let id = self.ids.get();
        if id == INVALID_ID {
            return None;
        }

        let (conn, outbound) = Connection::new(
            id,
            remote_addr,
            Arc::downgrade(self),
            self.metrics.clone(),
            self.outbound_depth,
        );

        let active = {
            let mut connections = self.connections.write();
            connections.insert(id, conn.clone());
            connections.len()
        };
        if let Some(m) = &self.metrics {
            m.record_connection(active as i64);
        }

        if let Some(hook) = &self.on_connect {
            hook(&conn);
        }

        Some((conn, outbound))
    }

    pub(crate) fn run_close_hook(&self, conn: &Connection) {
        if let Some(hook) = &self.on_close {
            hook(conn);
        }
    }

    /// Drop a closed connection and recycle its id
    pub(crate) fn forget(&self, id: u32) {
        let active = {
            let mut connections = self.connections.write();
            connections.remove(&id);
            connections.len()
        };
        if !self.ids.release(id) {
            tracing::warn!(conn_id = id, "Connection id was already released");
        }
        if let Some(m) = &self.metrics {
            m.record_disconnection(active as i64);
        }
    }

    /// Live connection by id
    pub fn get(&self, id: u32) -> Option<Connection> {
        self.connections.read().get(&id).cloned()
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// `true` when no connection is live
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Ids of all live connections
    pub fn ids(&self) -> Vec<u32> {
        self.connections.read().keys().copied().collect()
    }

    /// Close every live connection
    pub fn close_all(&self) {
        let connections: Vec<Connection> = self.connections.read().values().cloned().collect();
        tracing::info!(count = connections.len(), "Closing all connections");
        for conn in connections {
            conn.close();
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("connections", &self.len())
            .field("ids", &self.ids)
            .finish()
    }
}
