//! Shared helpers for wsrpc-server integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use wsrpc_server::{ServerBuilder, WsrpcServer};

/// Build the server on an ephemeral port and run it in the background
pub async fn start(builder: ServerBuilder) -> (Arc<WsrpcServer>, String) {
    let server = Arc::new(
        builder
            .bind_str("127.0.0.1:0")
            .unwrap()
            .build()
            .await
            .unwrap(),
    );
    let url = format!("ws://{}", server.local_addr().unwrap());

    let running = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = running.run().await;
    });

    (server, url)
}

/// Poll `condition` every 10 ms for up to 2 seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
