//! RPC client over WebSocket
//!
//! The client side of wsrpc: calls that wait for a correlated response with a
//! deadline, fire-and-forget notifications, and handlers for messages the
//! server pushes on its own.
//!
//! # Core Features
//!
//! - **Calls**: typed params and results, per-call or default deadline
//! - **Notifications**: sent with id `0`, never answered
//! - **Pushes**: server-initiated messages routed to handlers by method
//! - **Observability**: `tracing` spans and OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use wsrpc_client::{CallOptions, WsrpcClient};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = WsrpcClient::connect("ws://localhost:8080").await?;
//!
//!     let sum: i64 = client.call("add", &json!({"a": 5, "b": 3})).await?;
//!     println!("sum = {}", sum);
//!
//!     let slow: serde_json::Value = client
//!         .call_with("report", &(), CallOptions::timeout(Duration::from_secs(30)))
//!         .await?;
//!     println!("report = {}", slow);
//!
//!     client.add_handler("alerts", |alert| async move {
//!         println!("alert: {}", alert);
//!     })?;
//!
//!     client.notify("heartbeat", &()).await?;
//!     client.close().await;
//!     Ok(())
//! }
//! ```

mod client;
mod client_builder;
mod config;
mod metrics;
mod pending;
mod push;

pub use client::WsrpcClient;
pub use client_builder::ClientBuilder;
pub use config::{CallOptions, ClientConfig, DEFAULT_TIMEOUT};
pub use metrics::ClientMetrics;
pub use push::{PushFn, PushHandlers};
