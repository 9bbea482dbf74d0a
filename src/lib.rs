//! wsrpc - bidirectional JSON RPC over persistent WebSocket connections
//!
//! Convenience crate re-exporting the workspace:
//!
//! - **wsrpc-core**: message types, codec, errors, observability
//! - **wsrpc-server**: server with dispatcher, middleware, groups and
//!   per-connection worker pool
//! - **wsrpc-client**: client with request correlation, timeouts and
//!   push handlers
//! - **wsrpc-macros**: `#[handler]`
//!
//! # Server
//!
//! ```rust,no_run
//! use serde::Deserialize;
//! use wsrpc::WsrpcServer;
//! use wsrpc::core::Result;
//!
//! #[derive(Deserialize)]
//! struct AddParams { a: i32, b: i32 }
//!
//! #[wsrpc::handler]
//! async fn add(p: AddParams) -> Result<i32> {
//!     Ok(p.a + p.b)
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = WsrpcServer::builder()
//!         .bind_str("127.0.0.1:8080")?
//!         .handler("add", add())
//!         .build()
//!         .await?;
//!
//!     server.run().await
//! }
//! ```
//!
//! # Client
//!
//! ```rust,no_run
//! use serde_json::json;
//! use wsrpc::WsrpcClient;
//!
//! #[tokio::main]
//! async fn main() -> wsrpc::core::Result<()> {
//!     let client = WsrpcClient::connect("ws://127.0.0.1:8080").await?;
//!
//!     let sum: i32 = client.call("add", &json!({"a": 5, "b": 3})).await?;
//!     println!("{}", sum);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub use wsrpc_client as client;
pub use wsrpc_core as core;
pub use wsrpc_macros as macros;
pub use wsrpc_server as server;

pub use wsrpc_client::WsrpcClient;
pub use wsrpc_macros::handler;
pub use wsrpc_server::WsrpcServer;
