//! Core types for wsrpc
//!
//! This crate holds everything the server and client share:
//!
//! - **Envelope**: [`Request`] and [`Response`], with tri-state payloads
//! - **Codec**: encoding and decoding of envelopes, mapped onto wsrpc errors
//! - **Errors**: the [`Error`] taxonomy and the wire [`ErrorObject`]
//! - **Observability**: one-call setup of `tracing` and OpenTelemetry export
//! - **Transport**: [`is_connection_gone`], the read error classifier both
//!   ends of a WebSocket use
//!
//! # Example
//!
//! ```rust
//! use wsrpc_core::{codec, Request};
//! use serde_json::json;
//!
//! let request = Request::new("add", 1).with_params(json!({"a": 5, "b": 3}));
//! let json = codec::encode_request(&request).unwrap();
//!
//! let decoded = codec::decode_request(&json).unwrap();
//! assert_eq!(decoded.method, "add");
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod transport;
pub mod types;

pub use error::{Error, ErrorObject, Result};
pub use observability::{init_observability, LogFormat, ObservabilityConfig, ObservabilityGuard};
pub use transport::is_connection_gone;
pub use types::{Request, Response};
