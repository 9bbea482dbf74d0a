//! Server configuration
//!
//! [`ServerConfig`] is an explicit value handed to the builder; there is no
//! process-wide configuration. It deserializes from any serde format with
//! every field optional:
//!
//! ```rust
//! use wsrpc_server::ServerConfig;
//!
//! let config: ServerConfig = serde_json::from_str(r#"{"worker_pool_size": 4}"#).unwrap();
//! assert_eq!(config.worker_pool_size, 4);
//! assert_eq!(config.worker_queue_depth, 1024);
//! assert_eq!(config.max_connections, 5000);
//! ```

use serde::{Deserialize, Serialize};
use wsrpc_core::{Error, Result};

pub(crate) const DEFAULT_OUTBOUND_QUEUE_DEPTH: usize = 1024;

/// Tunables of a [`WsrpcServer`](crate::WsrpcServer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Number of dispatch workers; `0` dispatches inline on each connection's
    /// read loop.
    pub worker_pool_size: usize,

    /// Capacity of each worker queue. A full queue blocks the submitting
    /// connection until the worker catches up.
    pub worker_queue_depth: usize,

    /// Responses and pushes queued per connection before the write loop
    /// sends them. A connection whose queue fills up is closed.
    pub outbound_queue_depth: usize,

    /// Live connection ceiling. Upgrades beyond it are refused.
    pub max_connections: usize,

    /// Size of the connection id space `[1, max_connection_id]`.
    pub max_connection_id: u32,

    /// Host patterns allowed in the `Origin` header, e.g. `"*.example.com"`.
    ///
    /// Requests without an `Origin`, or whose origin matches the `Host`
    /// header, are always allowed.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 0,
            worker_queue_depth: 1024,
            outbound_queue_depth: DEFAULT_OUTBOUND_QUEUE_DEPTH,
            max_connections: 5000,
            max_connection_id: 3_000_000,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Check that the values are usable together
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the queue depth or id space is zero, or when the
    /// connection ceiling exceeds the id space.
    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size > 0 && self.worker_queue_depth == 0 {
            return Err(Error::Config("worker_queue_depth must be at least 1".into()));
        }
        if self.outbound_queue_depth == 0 {
            return Err(Error::Config("outbound_queue_depth must be at least 1".into()));
        }
        if self.max_connection_id == 0 {
            return Err(Error::Config("max_connection_id must be at least 1".into()));
        }
        if self.max_connections > self.max_connection_id as usize {
            return Err(Error::Config(format!(
                "max_connections ({}) exceeds max_connection_id ({})",
                self.max_connections, self.max_connection_id
            )));
        }
        Ok(())
    }
}
