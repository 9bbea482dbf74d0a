//! Bounded worker pool for request dispatch
//!
//! Each worker owns a bounded queue. A request goes to worker
//! `conn_id % size`, so all requests from one connection are handled by the
//! same worker in arrival order. A full queue makes the submitting read loop
//! wait, which in turn stops it reading from its socket.

use crate::context::Context;
use crate::dispatcher::Dispatcher;
use std::sync::Arc;
use tokio::sync::mpsc;
use wsrpc_core::{Error, Result};

/// Handle to the running workers
#[derive(Clone, Debug)]
pub struct WorkerPool {
    queues: Arc<[mpsc::Sender<Context>]>,
}

impl WorkerPool {
    pub(crate) fn start(dispatcher: Arc<Dispatcher>, size: usize, depth: usize) -> Self {
        let size = size.max(1);
        let queues: Vec<mpsc::Sender<Context>> = (0..size)
            .map(|index| {
                let (tx, mut rx) = mpsc::channel::<Context>(depth.max(1));
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    tracing::debug!(worker = index, "Worker started");
                    while let Some(ctx) = rx.recv().await {
                        dispatcher.dispatch(ctx).await;
                    }
                    tracing::debug!(worker = index, "Worker stopped");
                });
                tx
            })
            .collect();

        tracing::info!(workers = size, queue_depth = depth, "Worker pool started");
        Self {
            queues: queues.into(),
        }
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.queues.len()
    }

    /// Index of the worker serving `conn_id`
    pub fn worker_for(&self, conn_id: u32) -> usize {
        conn_id as usize % self.queues.len()
    }

    /// Queue `ctx` on its connection's worker, waiting while the queue is full
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] if the worker has stopped.
    pub async fn submit(&self, ctx: Context) -> Result<()> {
        let index = self.worker_for(ctx.conn().id());
        self.queues[index]
            .send(ctx)
            .await
            .map_err(|_| Error::Internal(format!("worker {} stopped", index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::handler::from_fn;
    use wsrpc_core::Request;

    fn dispatcher() -> Arc<Dispatcher> {
        let mut d = Dispatcher::new();
        d.register(
            "seq",
            from_fn(|ctx| async move {
                // Uneven work so a reordering would show up
                let delay = (ctx.id() % 3) as u64;
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                let _ = ctx.reply(&ctx.id());
            }),
            vec![],
        )
        .unwrap();
        Arc::new(d)
    }

    #[tokio::test]
    async fn test_same_connection_keeps_order() {
        let pool = dispatcher().start_worker_pool(4, 2);
        let (conn, mut rx) = Connection::detached(9);

        for id in 1..=20 {
            pool.submit(Context::new(Request::new("seq", id), conn.clone()))
                .await
                .unwrap();
        }

        for expected in 1..=20 {
            assert_eq!(rx.recv().await.unwrap().id, expected);
        }
    }

    #[test]
    fn test_worker_selection() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let pool = dispatcher().start_worker_pool(3, 8);
            assert_eq!(pool.size(), 3);
            assert_eq!(pool.worker_for(1), 1);
            assert_eq!(pool.worker_for(3), 0);
            assert_eq!(pool.worker_for(5), 2);
        });
    }

    #[tokio::test]
    async fn test_sequential_ids_spread_evenly() {
        let pool = dispatcher().start_worker_pool(4, 1);
        let mut load = [0usize; 4];
        for id in 1..=1000 {
            load[pool.worker_for(id)] += 1;
        }
        assert!(load.iter().all(|&n| n == 250));
    }

    #[tokio::test]
    async fn test_zero_size_is_clamped() {
        let pool = dispatcher().start_worker_pool(0, 0);
        assert_eq!(pool.size(), 1);

        let (conn, mut rx) = Connection::detached(2);
        pool.submit(Context::new(Request::new("seq", 3), conn)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().id, 3);
    }
}
