//! Per-transaction message routing
//!
//! Inbound protocol traffic arrives on one transport hook per actor. The
//! [`Demultiplexer`] splits it by transaction id into private FIFO
//! [`Inbox`]es so that concurrent transactions never see each other's
//! messages. A message for a transaction without an inbox is handed back
//! to the caller, which tells the transport to retain it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

struct Route<T> {
    generation: u64,
    tx: mpsc::UnboundedSender<T>,
}

type Routes<T> = Arc<Mutex<HashMap<String, Route<T>>>>;

/// Routes messages to the inbox registered for their transaction
pub struct Demultiplexer<T> {
    routes: Routes<T>,
    generation: AtomicU64,
}

impl<T: Send + 'static> Demultiplexer<T> {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Register an inbox for `txn`
    ///
    /// Returns `None` if the transaction already has one. The registration
    /// lasts until the returned inbox is closed or dropped.
    pub fn create_inbox(&self, txn: &str) -> Option<Inbox<T>> {
        let mut routes = self.routes.lock();
        if routes.contains_key(txn) {
            return None;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        routes.insert(txn.to_string(), Route { generation, tx });

        Some(Inbox {
            txn: txn.to_string(),
            generation,
            rx,
            routes: self.routes.clone(),
        })
    }

    /// Route a message to the inbox of `txn`
    ///
    /// Gives the message back if no inbox is registered.
    pub fn deliver(&self, txn: &str, message: T) -> Result<(), T> {
        let routes = self.routes.lock();
        match routes.get(txn) {
            Some(route) => route.tx.send(message).map_err(|e| e.0),
            None => Err(message),
        }
    }

    /// Whether `txn` currently has an inbox
    pub fn has_inbox(&self, txn: &str) -> bool {
        self.routes.lock().contains_key(txn)
    }

    /// Transactions that currently have an inbox
    pub fn transactions(&self) -> Vec<String> {
        let mut txns: Vec<String> = self.routes.lock().keys().cloned().collect();
        txns.sort();
        txns
    }
}

impl<T: Send + 'static> Default for Demultiplexer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Private FIFO queue of one transaction's messages
pub struct Inbox<T> {
    txn: String,
    generation: u64,
    rx: mpsc::UnboundedReceiver<T>,
    routes: Routes<T>,
}

impl<T> Inbox<T> {
    /// Transaction this inbox belongs to
    pub fn txn(&self) -> &str {
        &self.txn
    }

    /// Wait for the next message
    ///
    /// Never returns `None` while the inbox is registered, since the
    /// demultiplexer keeps the sending side alive.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Wait for the next message for at most `timeout`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Take the next message if one is queued
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Unregister the inbox and hand back whatever was still queued
    ///
    /// Once this returns no further message can arrive here; later
    /// deliveries for the transaction are rejected.
    pub fn close(mut self) -> Vec<T> {
        self.unregister();

        let mut leftovers = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            leftovers.push(message);
        }
        leftovers
    }

    fn unregister(&mut self) {
        let mut routes = self.routes.lock();
        if routes
            .get(&self.txn)
            .is_some_and(|route| route.generation == self.generation)
        {
            routes.remove(&self.txn);
            tracing::trace!("Inbox for {} closed", self.txn);
        }
    }
}

impl<T> Drop for Inbox<T> {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl<T> std::fmt::Debug for Inbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox")
            .field("txn", &self.txn)
            .field("generation", &self.generation)
            .finish()
    }
}
