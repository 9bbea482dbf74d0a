//! Common test utilities for wsrpc-client integration tests
//!
//! A lightweight WebSocket server that answers with canned frames, so client
//! behavior can be tested without a full wsrpc-server.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Mock WebSocket server for client testing
///
/// Every text frame received is recorded and passed to the handler; each
/// string the handler returns is sent back as a text frame. Frames can also
/// be injected at any time with [`MockWsServer::send`], which goes to the
/// first connection accepted.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    received: mpsc::UnboundedReceiver<String>,
    inject: mpsc::UnboundedSender<Message>,
}

impl MockWsServer {
    /// Mock server that never answers
    pub async fn silent() -> Self {
        Self::with_handler(|_| Vec::new()).await
    }

    /// Mock server answering each frame with the frames `handler` returns
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (received_tx, received) = mpsc::unbounded_channel::<String>();
        let (inject, inject_rx) = mpsc::unbounded_channel::<Message>();
        let handler = std::sync::Arc::new(handler);

        tokio::spawn(async move {
            let mut inject_rx = Some(inject_rx);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let received_tx = received_tx.clone();
                        let handler = handler.clone();
                        let mut inject_rx = inject_rx.take();

                        tokio::spawn(async move {
                            let Ok(ws) = accept_async(stream).await else { return };
                            let (mut write, mut read) = ws.split();

                            loop {
                                let injected = async {
                                    match inject_rx.as_mut() {
                                        Some(rx) => rx.recv().await,
                                        None => std::future::pending().await,
                                    }
                                };
                                tokio::select! {
                                    frame = read.next() => {
                                        match frame {
                                            Some(Ok(Message::Text(text))) => {
                                                let _ = received_tx.send(text.clone());
                                                for reply in handler(&text) {
                                                    let _ = write.send(Message::Text(reply)).await;
                                                }
                                            }
                                            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                                            Some(Ok(_)) => {}
                                        }
                                    }
                                    message = injected => {
                                        let Some(message) = message else { break };
                                        let closing = matches!(message, Message::Close(_));
                                        let _ = write.send(message).await;
                                        if closing {
                                            let _ = write.close().await;
                                            break;
                                        }
                                    }
                                }
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            received,
            inject,
        }
    }

    /// WebSocket URL of this server
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Next frame the server received, waiting up to 5 seconds
    pub async fn next_received(&mut self) -> Option<String> {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.received.recv())
            .await
            .ok()
            .flatten()
    }

    /// Send a text frame to the connected client
    pub fn send(&self, text: String) {
        let _ = self.inject.send(Message::Text(text));
    }

    /// Close the connection from the server side
    pub fn close_connection(&self) {
        let _ = self.inject.send(Message::Close(None));
    }

    /// Stop accepting connections
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Parse a received frame
pub fn parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

/// Result frame answering `request`
pub fn reply_to(request: &str, result: Value) -> String {
    let request = parse(request);
    json!({"method": request["method"], "id": request["id"], "result": result}).to_string()
}

/// Error frame answering `request`
pub fn error_to(request: &str, code: i64, msg: &str) -> String {
    let request = parse(request);
    json!({
        "method": request["method"],
        "id": request["id"],
        "error": {"code": code, "msg": msg}
    })
    .to_string()
}

/// Server push frame
pub fn push(method: &str, result: Value) -> String {
    json!({"method": method, "id": 0, "result": result}).to_string()
}
