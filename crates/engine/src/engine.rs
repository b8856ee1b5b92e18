//! Core mock engine implementation
//!
//! The engine connects actors by address. Delivery is best-effort: every
//! message is handed to the recipient's inbound hook on its own task, so
//! messages can overtake each other, and a fault plan can drop or duplicate
//! them on the way.

use crate::{Message, MockEngineError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Inbound hook registered for an address
///
/// Returns `true` when the message was consumed. Rejected messages are kept
/// in the recipient's mailbox for generic delivery.
pub trait MessageHandler: Send + Sync {
    fn deliver(&self, message: Message) -> bool;
}

/// What the fault plan does with a message in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Deliver,
    Drop,
    Duplicate,
}

/// Most messages kept per address; the oldest is discarded beyond that
pub const MAILBOX_CAPACITY: usize = 1024;

/// Type alias for fault injection closures
pub type FaultPlan = Arc<dyn Fn(&Message) -> Delivery + Send + Sync>;

/// Mock engine that simulates an unreliable network
pub struct MockEngine {
    /// Inbound hooks by address
    handlers: Arc<Mutex<HashMap<String, Arc<dyn MessageHandler>>>>,

    /// Messages rejected by their recipient's hook, bounded per address
    mailboxes: Arc<Mutex<HashMap<String, VecDeque<Message>>>>,

    /// Addresses cut off from the network
    partitioned: Arc<Mutex<HashSet<String>>>,

    /// Optional fault injection
    fault_plan: Arc<Mutex<Option<FaultPlan>>>,

    /// Every message handed to `send`, in order; kept for inspection
    sent: Arc<Mutex<Vec<Message>>>,
}

impl MockEngine {
    /// Create a new mock engine
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            mailboxes: Arc::new(Mutex::new(HashMap::new())),
            partitioned: Arc::new(Mutex::new(HashSet::new())),
            fault_plan: Arc::new(Mutex::new(None)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register the inbound hook for an address
    pub fn register_handler(
        &self,
        address: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let mut handlers = self.handlers.lock();
        if handlers.contains_key(address) {
            return Err(MockEngineError::AddressInUse(address.to_string()));
        }
        handlers.insert(address.to_string(), handler);
        Ok(())
    }

    /// Remove the inbound hook for an address; later messages are dropped
    pub fn unregister_handler(&self, address: &str) -> Result<()> {
        self.handlers
            .lock()
            .remove(address)
            .map(|_| ())
            .ok_or_else(|| MockEngineError::AddressNotFound(address.to_string()))
    }

    /// Whether an address currently has a hook
    pub fn is_registered(&self, address: &str) -> bool {
        self.handlers.lock().contains_key(address)
    }

    /// Send a message
    ///
    /// Never blocks and never reports delivery failures: a message to an
    /// unknown or partitioned address is silently lost.
    pub fn send(&self, message: Message) {
        self.sent.lock().push(message.clone());

        {
            let partitioned = self.partitioned.lock();
            if partitioned.contains(&message.from) || partitioned.contains(&message.to) {
                tracing::trace!("Dropping partitioned message {} -> {}", message.from, message.to);
                return;
            }
        }

        let plan = self.fault_plan.lock().clone();
        let delivery = plan.map_or(Delivery::Deliver, |plan| plan(&message));

        match delivery {
            Delivery::Drop => {
                tracing::trace!("Fault plan dropped message {} -> {}", message.from, message.to);
            }
            Delivery::Deliver => self.dispatch(message),
            Delivery::Duplicate => {
                self.dispatch(message.clone());
                self.dispatch(message);
            }
        }
    }

    /// Hand one copy of a message to its recipient on a fresh task
    fn dispatch(&self, message: Message) {
        let handlers = self.handlers.clone();
        let mailboxes = self.mailboxes.clone();

        tokio::spawn(async move {
            let handler = handlers.lock().get(&message.to).cloned();
            match handler {
                Some(handler) => {
                    let to = message.to.clone();
                    if !handler.deliver(message.clone()) {
                        let mut mailboxes = mailboxes.lock();
                        let mailbox = mailboxes.entry(to).or_default();
                        mailbox.push_back(message);
                        if mailbox.len() > MAILBOX_CAPACITY
                            && let Some(oldest) = mailbox.pop_front()
                        {
                            tracing::debug!(
                                "Mailbox of {} is full, discarding message from {}",
                                oldest.to,
                                oldest.from
                            );
                        }
                    }
                }
                None => {
                    tracing::trace!("No handler for {}, message lost", message.to);
                }
            }
        });
    }

    /// Take the oldest retained message for an address
    pub fn next_retained(&self, address: &str) -> Option<Message> {
        self.mailboxes.lock().get_mut(address)?.pop_front()
    }

    /// Number of retained messages waiting for an address
    pub fn retained_count(&self, address: &str) -> usize {
        self.mailboxes.lock().get(address).map_or(0, VecDeque::len)
    }

    /// Drop all traffic to and from an address
    pub fn partition(&self, address: &str) {
        self.partitioned.lock().insert(address.to_string());
    }

    /// Reconnect a partitioned address
    pub fn heal(&self, address: &str) {
        self.partitioned.lock().remove(address);
    }

    /// Install a fault plan deciding the fate of every message
    pub fn set_fault_plan<F>(&self, plan: F)
    where
        F: Fn(&Message) -> Delivery + Send + Sync + 'static,
    {
        *self.fault_plan.lock() = Some(Arc::new(plan));
    }

    /// Remove the fault plan
    pub fn clear_fault_plan(&self) {
        *self.fault_plan.lock() = None;
    }

    /// Copy of every message sent so far
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    /// Number of messages sent from one address to another
    pub fn sent_count(&self, from: &str, to: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.from == from && m.to == to)
            .count()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}
