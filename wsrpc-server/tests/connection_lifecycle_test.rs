//! Connection lifecycle integration tests for wsrpc-server

mod common;

use common::{start, wait_until};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wsrpc_client::WsrpcClient;
use wsrpc_core::Error;
use wsrpc_server::{from_fn, Context, WsrpcServer};

#[tokio::test]
async fn test_hooks_run_once_per_connection() {
    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let o = opened.clone();
    let c = closed.clone();

    let (server, url) = start(
        WsrpcServer::builder()
            .on_connect(move |_| {
                o.fetch_add(1, Ordering::SeqCst);
            })
            .on_close(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
    )
    .await;

    let client = WsrpcClient::connect(&url).await.unwrap();
    assert!(wait_until(|| opened.load(Ordering::SeqCst) == 1).await);
    assert_eq!(server.connection_count(), 1);

    client.close().await;
    assert!(wait_until(|| closed.load(Ordering::SeqCst) == 1).await);
    assert!(wait_until(|| server.connection_count() == 0).await);

    // Nothing runs twice
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_close_reaches_clients() {
    let (server, url) = start(WsrpcServer::builder()).await;

    let a = WsrpcClient::connect(&url).await.unwrap();
    let b = WsrpcClient::connect(&url).await.unwrap();
    assert!(wait_until(|| server.connection_count() == 2).await);

    server.close();

    assert!(wait_until(|| a.is_closed() && b.is_closed()).await);
    assert_eq!(server.connection_count(), 0);
    assert!(matches!(
        a.call::<_, Value>("x", &()).await,
        Err(Error::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_handler_closes_connection() {
    let (server, url) = start(WsrpcServer::builder().handler(
        "quit",
        from_fn(|ctx: Context| async move {
            let _ = ctx.reply(&"bye");
            ctx.conn().close();
        }),
    ))
    .await;

    let client = WsrpcClient::connect(&url).await.unwrap();
    let reply: String = client.call("quit", &()).await.unwrap();
    assert_eq!(reply, "bye");

    assert!(wait_until(|| client.is_closed()).await);
    assert!(wait_until(|| server.connection_count() == 0).await);
}

#[tokio::test]
async fn test_connection_ids_are_recycled() {
    let (server, url) = start(WsrpcServer::builder().max_connections(2)).await;

    for _ in 0..5 {
        let client = WsrpcClient::connect(&url).await.unwrap();
        assert!(wait_until(|| server.connection_count() == 1).await);
        client.close().await;
        assert!(wait_until(|| server.connection_count() == 0).await);
    }
}

#[tokio::test]
async fn test_long_handler_keeps_reply() {
    let (_server, url) = start(WsrpcServer::builder().handler(
        "later",
        from_fn(|ctx: Context| async move {
            // Detached work replies after the handler returned
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                let _ = ctx.reply(&ctx.id());
            });
        }),
    ))
    .await;

    let client = WsrpcClient::connect(&url).await.unwrap();
    let (a, b) = tokio::join!(
        client.call::<_, i64>("later", &()),
        client.call::<_, i64>("later", &()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a, b);
    assert!(a > 0 && b > 0);

    client.close().await;
}
