//! Client configuration
//!
//! ```rust
//! use wsrpc_client::ClientConfig;
//! use std::time::Duration;
//!
//! let config: ClientConfig = serde_json::from_str("{}").unwrap();
//! assert_eq!(config.default_timeout, Duration::from_millis(5000));
//!
//! let config: ClientConfig = serde_json::from_str(r#"{"default_timeout_ms": 250}"#).unwrap();
//! assert_eq!(config.default_timeout, Duration::from_millis(250));
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Default deadline for calls made without [`CallOptions`]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Tunables of a [`WsrpcClient`](crate::WsrpcClient)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline applied to calls that do not set their own
    #[serde(
        rename = "default_timeout_ms",
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    pub default_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Per-call overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Deadline for this call; `None` uses the client's default
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Options with a specific deadline
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

fn deserialize_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}
