//! Pending-call table
//!
//! Every call gets the next sequence id (starting at 1; `0` is reserved for
//! notifications and pushes) and a oneshot channel. The reader task completes
//! the entry when the matching response arrives; a caller that gives up
//! (timeout, send failure) evicts it, so a late response finds nothing and is
//! dropped as unmatched.
//!
//! # Lifecycle
//!
//! 1. **Register**: allocate an id, store the completion channel
//! 2. **Send**: the caller writes the request
//! 3. **Complete / Evict**: the reader delivers the response, or the caller
//!    removes the entry
//! 4. **Close**: every entry fails with `ConnectionClosed` and later
//!    registrations are refused

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use wsrpc_core::{Error, Response, Result};

/// Receiving half handed to the caller
pub(crate) type CallReceiver = oneshot::Receiver<Result<Response>>;

struct PendingCall {
    method: String,
    tx: oneshot::Sender<Result<Response>>,
}

#[derive(Default)]
struct Table {
    calls: HashMap<i64, PendingCall>,
    closed: bool,
}

/// Calls waiting for their response
#[derive(Clone)]
pub(crate) struct PendingCalls {
    table: Arc<Mutex<Table>>,
    sequence: Arc<AtomicI64>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::default())),
            sequence: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Allocate an id and register a call under it
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] once the table has been closed.
    pub(crate) fn register(&self, method: &str) -> Result<(i64, CallReceiver)> {
        let mut table = self.table.lock();
        if table.closed {
            return Err(Error::ConnectionClosed);
        }
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        table.calls.insert(
            id,
            PendingCall {
                method: method.to_string(),
                tx,
            },
        );
        Ok((id, rx))
    }

    /// Deliver `response` to its caller; `false` when no call is waiting
    pub(crate) fn complete(&self, response: Response) -> bool {
        let call = self.table.lock().calls.remove(&response.id);
        match call {
            Some(call) => {
                if call.method != response.method && !response.method.is_empty() {
                    tracing::debug!(
                        id = response.id,
                        expected = %call.method,
                        got = %response.method,
                        "Response method differs from call"
                    );
                }
                // The caller may have stopped waiting; nothing to do then
                let _ = call.tx.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `id`; `true` if it was still pending
    pub(crate) fn evict(&self, id: i64) -> bool {
        self.table.lock().calls.remove(&id).is_some()
    }

    /// Refuse new calls and fail every pending one with `error`
    pub(crate) fn close(&self, error: Error) -> usize {
        let drained: Vec<PendingCall> = {
            let mut table = self.table.lock();
            table.closed = true;
            table.calls.drain().map(|(_, call)| call).collect()
        };
        let count = drained.len();
        for call in drained {
            let _ = call.tx.send(Err(error.clone()));
        }
        count
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.table.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.table.lock().calls.len()
    }
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("PendingCalls")
            .field("pending", &table.calls.len())
            .field("closed", &table.closed)
            .finish()
    }
}
