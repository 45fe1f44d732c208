//! Correlation table: outstanding request id -> waiting caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::protocol::ResponseError;

pub(crate) type Outcome = Result<serde_json::Value, ResponseError>;

struct Table {
    waiters: HashMap<u64, oneshot::Sender<Outcome>>,
    /// Set once the read loop has stopped; no new waiters are accepted.
    closed: bool,
}

pub(crate) struct PendingCalls {
    next_id: AtomicU64,
    table: Mutex<Table>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            table: Mutex::new(Table {
                waiters: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Allocate the next id and park a waiter for it.
    ///
    /// Returns `None` if the connection has already closed. The returned
    /// guard removes the entry when dropped, so an abandoned call never
    /// leaves a dangling waiter behind.
    pub fn register(&self) -> Option<(PendingGuard<'_>, oneshot::Receiver<Outcome>)> {
        let (tx, rx) = oneshot::channel();
        let mut table = self.table.lock();
        if table.closed {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = table.waiters.insert(id, tx);
        debug_assert!(previous.is_none(), "request id {id} reused");
        drop(table);
        Some((PendingGuard { calls: self, id }, rx))
    }

    /// Deliver a response. Returns `false` if nobody was waiting for `id`
    /// (never issued, already answered, or abandoned).
    pub fn complete(&self, id: u64, outcome: Outcome) -> bool {
        let Some(tx) = self.table.lock().waiters.remove(&id) else {
            return false;
        };
        // The receiver may have been dropped between removal and send.
        tx.send(outcome).is_ok()
    }

    /// Fail every outstanding call and refuse new ones.
    ///
    /// Dropping the senders wakes each waiter with a closed-channel error.
    pub fn close(&self) -> usize {
        let mut table = self.table.lock();
        table.closed = true;
        let drained = table.waiters.len();
        table.waiters.clear();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.table.lock().closed
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.table.lock().waiters.len()
    }

    fn abandon(&self, id: u64) {
        self.table.lock().waiters.remove(&id);
    }
}

/// Removes its pending entry on drop.
pub(crate) struct PendingGuard<'a> {
    calls: &'a PendingCalls,
    id: u64,
}

impl PendingGuard<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.calls.abandon(self.id);
    }
}
