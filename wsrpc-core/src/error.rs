//! Error types for wsrpc
//!
//! Two error types live here:
//!
//! - **Error**: every failure a wsrpc API can return (uses thiserror)
//! - **ErrorObject**: the error object carried inside a response on the wire
//!
//! # Error Taxonomy
//!
//! | kind            | variants                                        |
//! |-----------------|-------------------------------------------------|
//! | transport       | `Transport`, `Io`                               |
//! | decode          | `Decode`                                        |
//! | protocol        | `DuplicateHandler`, `Marshal`, `Encoding`       |
//! | dispatch        | `MethodNotFound`, `InvalidParams`               |
//! | remote          | `Rpc`                                           |
//! | timeout         | `Timeout`                                       |
//! | closed          | `ConnectionClosed`                              |
//!
//! # Application Codes
//!
//! Wire codes are application-defined. The framework itself only emits
//! [`ErrorObject::NOT_FOUND`] (unknown method), [`ErrorObject::INVALID_PARAMS`]
//! and [`ErrorObject::INTERNAL`].
//!
//! # Examples
//!
//! ```rust
//! use wsrpc_core::{Error, ErrorObject};
//!
//! let remote = ErrorObject::new(ErrorObject::NOT_FOUND, "method not found: ping");
//! let error: Error = remote.into();
//! assert!(matches!(error, Error::Rpc(ref e) if e.code == 404));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Result type for wsrpc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a wsrpc operation can surface
///
/// The enum is `Clone` so one transport failure can be fanned out to every
/// pending caller.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Error object received from (or destined for) the remote peer
    #[error("rpc error: {0}")]
    Rpc(#[from] ErrorObject),

    /// WebSocket transport failure: handshake, read or write
    #[error("transport error: {0}")]
    Transport(String),

    /// Operating system level I/O failure (bind, accept)
    #[error("io error: {0}")]
    Io(String),

    /// Inbound bytes could not be decoded into an envelope or a target type
    #[error("decode error: {0}")]
    Decode(String),

    /// A value could not be encoded into an envelope payload
    #[error("encoding error: {0}")]
    Encoding(String),

    /// An envelope is not encodable as it stands
    ///
    /// Raised for a response that carries neither a result nor an error.
    #[error("marshal error: {0}")]
    Marshal(String),

    /// A handler name was registered twice
    #[error("duplicate handler: {0}")]
    DuplicateHandler(String),

    /// No handler is registered for the method
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Request params do not fit the handler's parameter type
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A call did not complete within its budget
    #[error("request [{method}] timed out after {} ms", .timeout.as_millis())]
    Timeout {
        /// Method of the call that timed out
        method: String,
        /// Budget that elapsed
        timeout: Duration,
    },

    /// The connection is closed, or closed while the call was pending
    #[error("connection closed")]
    ConnectionClosed,

    /// Nothing stored under the key in a connection's user store
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a timeout error for `method`
    pub fn timeout(method: impl Into<String>, timeout: Duration) -> Self {
        Error::Timeout {
            method: method.into(),
            timeout,
        }
    }

    /// Convert the error into the wire object a handler replies with
    ///
    /// `Rpc` errors pass through untouched, parameter errors become
    /// [`ErrorObject::INVALID_PARAMS`], unknown methods become
    /// [`ErrorObject::NOT_FOUND`] and everything else is
    /// [`ErrorObject::INTERNAL`].
    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            Error::Rpc(obj) => obj.clone(),
            Error::InvalidParams(msg) | Error::Decode(msg) => {
                ErrorObject::new(ErrorObject::INVALID_PARAMS, format!("invalid params: {msg}"))
            }
            Error::MethodNotFound(method) => {
                ErrorObject::new(ErrorObject::NOT_FOUND, format!("method not found: {method}"))
            }
            other => ErrorObject::new(ErrorObject::INTERNAL, other.to_string()),
        }
    }
}

/// Error object as carried in the `error` field of a response
///
/// On the wire it is `{"code": int, "msg": string, "data": any}`. `data` is
/// always written and reads back as `null` when the peer omitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Application error code
    pub code: i64,

    /// Human-readable message
    #[serde(rename = "msg")]
    pub message: String,

    /// Arbitrary detail, `null` when unset
    #[serde(default)]
    pub data: Value,
}

impl ErrorObject {
    /// Unknown method
    pub const NOT_FOUND: i64 = 404;
    /// Params could not be bound
    pub const INVALID_PARAMS: i64 = 400;
    /// Handler failed for a reason of its own
    pub const INTERNAL: i64 = 500;

    /// Create an error object without data
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }

    /// Create an error object with additional data
    ///
    /// ```rust
    /// use wsrpc_core::ErrorObject;
    /// use serde_json::json;
    ///
    /// let err = ErrorObject::with_data(402, "insufficient funds", json!({"balance": 50}));
    /// assert_eq!(err.data["balance"], 50);
    /// ```
    pub fn with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// Error object used for an unknown method
    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::NOT_FOUND, format!("method not found: {method}"))
    }
}

impl std::fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorObject {}
